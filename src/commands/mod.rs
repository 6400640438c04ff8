//! Command Processing Module
//!
//! The command layer sits between the protocol parser and the keyspace:
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Queue/Exec   │
//! │  - AOF gating   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Keyspace     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! `command` defines the shape-validated frame, `registry` the static
//! name-to-descriptor table, and `handler` the dispatcher plus every
//! command implementation.

pub mod command;
pub mod handler;
pub mod registry;

// Re-export the main entry points
pub use command::Command;
pub use handler::{DispatchOutcome, Dispatcher, ServerCore};
pub use registry::{Arity, CommandKind, CommandRegistry, CommandSpec};
