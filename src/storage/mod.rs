//! Storage Module
//!
//! The keyspace: a map of binary-safe keys to string values with a
//! parallel expiration map, lazy expiration on every read path, and a
//! timer-driven sampling sweep for keys that are never touched again.
//!
//! The keyspace itself is not synchronized; the dispatcher owns it behind
//! a single lock so command execution observes no interleaving.

pub mod keyspace;

// Re-export commonly used types
pub use keyspace::{glob_match, Keyspace, SWEEP_MAX_ROUNDS, SWEEP_SAMPLE};
