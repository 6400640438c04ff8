//! Canonical command frame
//!
//! The wire gives us a RESP array of bulk strings; this module validates
//! that shape and turns it into a frame the registry and handlers can work
//! with: an uppercased name for table lookup, the name as the client sent
//! it for error messages, and the argument payloads.

use crate::protocol::RespValue;
use bytes::Bytes;

/// A shape-validated command: non-nil array of non-nil bulk strings with
/// at least the command name present.
#[derive(Debug, Clone)]
pub struct Command {
    /// Every element of the source array, name included.
    parts: Vec<Bytes>,
    /// Uppercased name used for registry lookup.
    name: String,
    /// The name exactly as the client sent it, for error messages.
    raw_name: String,
}

impl Command {
    /// Validates the RESP shape of `value` and builds a frame.
    ///
    /// Returns `None` for anything that is not a non-empty, non-nil array
    /// of non-nil bulk strings; the dispatcher treats that as a protocol
    /// error fatal to the connection.
    pub fn parse(value: &RespValue) -> Option<Command> {
        let elements = value.as_array()?;
        if elements.is_empty() {
            return None;
        }

        let mut parts = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                RespValue::BulkString(Some(data)) => parts.push(data.clone()),
                _ => return None,
            }
        }

        let raw_name = String::from_utf8_lossy(&parts[0]).into_owned();
        let name = raw_name.to_uppercase();
        Some(Command {
            parts,
            name,
            raw_name,
        })
    }

    /// Uppercased command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command name as the client spelled it.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Bytes] {
        &self.parts[1..]
    }

    /// Number of arguments after the command name.
    pub fn argc(&self) -> usize {
        self.parts.len() - 1
    }

    /// Rebuilds the RESP array for this command, e.g. for the AOF.
    pub fn to_resp(&self) -> RespValue {
        RespValue::array(
            self.parts
                .iter()
                .map(|part| RespValue::BulkString(Some(part.clone())))
                .collect(),
        )
    }
}
