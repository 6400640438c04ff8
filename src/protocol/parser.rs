//! Incremental RESP Protocol Parser
//!
//! The parser consumes a byte slice and returns either:
//! - `Ok(Some((value, consumed)))` - a complete value, `consumed` bytes used
//! - `Ok(None)` - the data is incomplete; the caller keeps its buffer
//!   unchanged and retries once more bytes arrive
//! - `Err(ParseError)` - the data violates the protocol
//!
//! This design lets the connection layer:
//! 1. Append incoming network data to its buffer
//! 2. Call [`parse`] to attempt parsing
//! 3. On success, advance the buffer by `consumed` bytes
//! 4. On incomplete data, wait for more
//! 5. On error, reply with a protocol error and close the client
//!
//! Only the five RESP2 types are accepted; the inline command form is not
//! supported, so a line starting with anything but `+ - : $ *` is a
//! protocol error.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
///
/// Every variant is a protocol violation; incomplete input is signalled
/// with `Ok(None)` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown type prefix byte (inline commands are not supported)
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format in an integer value or a length header
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for nil)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for nil)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Generic protocol violation (bare CR/LF, missing terminator,
    /// nesting too deep)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bulk string exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevents stack exhaustion)
pub const MAX_NESTING_DEPTH: usize = 128;

/// Attempts to parse one RESP value from the front of `buf`.
pub fn parse(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_value(buf, 0)
}

fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::Protocol(format!(
            "maximum nesting depth exceeded: {}",
            MAX_NESTING_DEPTH
        )));
    }

    match buf[0] {
        prefix::SIMPLE_STRING => parse_line(buf).map(|r| {
            r.map(|(s, consumed)| (RespValue::SimpleString(s), consumed))
        }),
        prefix::ERROR => parse_line(buf).map(|r| {
            r.map(|(s, consumed)| (RespValue::Error(s), consumed))
        }),
        prefix::INTEGER => parse_integer(buf),
        prefix::BULK_STRING => parse_bulk_string(buf),
        prefix::ARRAY => parse_array(buf, depth),
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Parses the `<line>\r\n` payload after a `+`, `-` or `:` prefix.
///
/// Returns the line content and the total bytes consumed including the
/// prefix and terminator.
fn parse_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match read_line(&buf[1..])? {
        Some((content, line_len)) => {
            let s = std::str::from_utf8(content)
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s.to_string(), 1 + line_len)))
        }
        None => Ok(None),
    }
}

/// Parses an integer: `:<signed-decimal>\r\n`
fn parse_integer(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    match parse_line(buf)? {
        Some((s, consumed)) => {
            let n: i64 = s
                .parse()
                .map_err(|_| ParseError::InvalidInteger(s))?;
            Ok(Some((RespValue::Integer(n), consumed)))
        }
        None => Ok(None),
    }
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`; `$-1\r\n` is nil.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let (length, header_len) = match read_length(buf)? {
        Some(h) => h,
        None => return Ok(None),
    };

    if length == -1 {
        return Ok(Some((RespValue::BulkString(None), header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = header_len + length + 2;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[header_len + length..total_needed] != CRLF {
        return Err(ParseError::Protocol(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
    Ok(Some((RespValue::BulkString(Some(data)), total_needed)))
}

/// Parses an array: `*<count>\r\n<element>...`; `*-1\r\n` is nil.
///
/// Elements parse recursively; a partial element makes the whole array
/// incomplete, never an error.
fn parse_array(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    let (count, header_len) = match read_length(buf)? {
        Some(h) => h,
        None => return Ok(None),
    };

    if count == -1 {
        return Ok(Some((RespValue::Array(None), header_len)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let count = count as usize;
    let mut elements = Vec::with_capacity(count.min(64));
    let mut consumed = header_len;

    for _ in 0..count {
        match parse_value(&buf[consumed..], depth + 1)? {
            Some((value, element_consumed)) => {
                elements.push(value);
                consumed += element_consumed;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(Some(elements)), consumed)))
}

/// Reads the signed decimal header after a `$` or `*` prefix.
///
/// Returns the parsed length and the bytes consumed including the prefix
/// and the header's CRLF.
fn read_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_line(&buf[1..])? {
        Some((content, line_len)) => {
            let s = std::str::from_utf8(content)
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            let n: i64 = s
                .parse()
                .map_err(|_| ParseError::InvalidInteger(s.to_string()))?;
            Ok(Some((n, 1 + line_len)))
        }
        None => Ok(None),
    }
}

/// Scans for the CRLF terminator of a line.
///
/// Line payloads may not contain a bare CR or LF, so the first CR must be
/// immediately followed by LF and no LF may appear on its own. Returns the
/// content before the terminator and the bytes consumed including CRLF, or
/// `None` when the terminator has not arrived yet.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    for i in 0..buf.len() {
        match buf[i] {
            b'\r' => {
                return match buf.get(i + 1) {
                    Some(b'\n') => Ok(Some((&buf[..i], i + 2))),
                    Some(_) => Err(ParseError::Protocol(
                        "bare CR inside line".to_string(),
                    )),
                    None => Ok(None),
                };
            }
            b'\n' => {
                return Err(ParseError::Protocol("bare LF inside line".to_string()));
            }
            _ => {}
        }
    }
    Ok(None)
}
