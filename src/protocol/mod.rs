//! RESP Protocol Implementation
//!
//! A complete implementation of the Redis Serialization Protocol (RESP2):
//! a typed value model with bit-exact serialization, and an incremental
//! parser that tolerates partial input.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and serialization
//! - `parser`: incremental parser for incoming RESP data
//!
//! ## Example
//!
//! ```
//! use cinderkv::protocol::{parse, RespValue};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (command, consumed) = parse(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(command.as_array().unwrap().len(), 2);
//!
//! let reply = RespValue::bulk("alice");
//! assert_eq!(reply.serialize(), b"$5\r\nalice\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used items for convenience
pub use parser::{parse, ParseError, ParseResult, MAX_NESTING_DEPTH};
pub use types::RespValue;
