//! # cinderkv - A Redis-compatible In-Memory Key-Value Server
//!
//! cinderkv speaks the RESP2 wire protocol, keeps a single keyspace of
//! binary-safe string values with per-key expiration, logs mutating
//! commands to an append-only file (AOF) under configurable durability
//! policies, and supports MULTI/EXEC/DISCARD command transactions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            cinderkv                              │
//! │                                                                  │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────────────┐  │
//! │  │ TCP accept │──>│  Connection  │──>│      Dispatcher        │  │
//! │  │  (main.rs) │   │ Buffer+RESP  │   │ table / arity / MULTI  │  │
//! │  └────────────┘   └──────────────┘   └──────────┬─────────────┘  │
//! │                                                 │                │
//! │                                      ┌──────────▼─────────────┐  │
//! │                                      │   Keyspace  +  AOF     │  │
//! │                                      │  (one lock, in order)  │  │
//! │                                      └──────────▲─────────────┘  │
//! │                                                 │                │
//! │  ┌───────────────┐    fires    ┌────────────────┴─────────────┐  │
//! │  │  TimerDriver  │────────────>│ expiry sweep (100 ms)        │  │
//! │  │  (min-heap)   │             │ AOF fsync (1 s, everysec)    │  │
//! │  └───────────────┘             └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP2 value model, serializer, and incremental parser
//! - [`connection`]: per-client input buffer and handler task
//! - [`commands`]: command table, dispatcher, and handlers
//! - [`storage`]: the keyspace with lazy + sampled expiration
//! - [`transaction`]: per-connection MULTI/EXEC queue state
//! - [`aof`]: append-only persistence and startup replay
//! - [`timer`]: deadline min-heap driving all periodic work
//! - [`config`]: the config-file surface the binary consumes
//!
//! ## Design Highlights
//!
//! ### One lock, sequential semantics
//!
//! Connections run as independent Tokio tasks, but every command takes
//! the single core lock for its whole execute-and-log step and EXEC holds
//! it across the entire transaction queue. Observable behavior matches a
//! single-threaded server processing commands in arrival order.
//!
//! ### Durability before replies
//!
//! A mutating command reaches the AOF (and, under `appendfsync always`,
//! the disk) before its reply is serialized, so an acknowledged write is
//! never lost by a crash under the strictest policy.
//!
//! ### Lazy + sampled expiration
//!
//! Expired keys are deleted on first touch, and a 100 ms timer samples
//! the expiration map to reclaim keys nobody touches, without ever
//! scanning the full keyspace.

pub mod aof;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;
pub mod timer;
pub mod transaction;

// Re-export commonly used types for convenience
pub use aof::{Aof, AofError, FsyncPolicy};
pub use commands::{DispatchOutcome, Dispatcher};
pub use config::Config;
pub use connection::{handle_connection, Buffer, ConnectionStats};
pub use protocol::{parse, ParseError, RespValue};
pub use storage::Keyspace;
pub use timer::{TimerDriver, TimerQueue};
pub use transaction::TransactionSession;

/// Version of cinderkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
