//! Connection Module
//!
//! Per-client plumbing: the cursor-based input [`buffer::Buffer`] that
//! network reads land in, and the [`handler::ConnectionHandler`] task that
//! parses, dispatches, and replies for one client until it disconnects.
//!
//! Each connection owns its buffers and its transaction state; everything
//! shared (keyspace, AOF, statistics) is reached through the dispatcher.

pub mod buffer;
pub mod handler;

// Re-export commonly used types
pub use buffer::Buffer;
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
