//! Incremental RESP Parser
//!
//! The parser works on a borrowed byte slice and never blocks. A call returns:
//!
//! - `Ok(Some((value, consumed)))` - one complete value, `consumed` bytes long
//! - `Ok(None)` - the value is incomplete, append more bytes and retry
//! - `Err(ParseError)` - the bytes can never form a valid value
//!
//! The same parser frames client requests off a socket and journal records off
//! disk. When the journal reaches end-of-file while the parser still reports
//! `Ok(None)`, the last record was torn by a crash.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Length or integer field is not a valid number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string, error, or header line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Any other framing violation (missing CRLF, nesting too deep, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP parser.
///
/// # Example
///
/// ```
/// use shardkv::protocol::{RespParser, RespValue};
/// use bytes::{Buf, BytesMut};
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n+PA"[..]);
///
/// let (value, consumed) = parser.parse(&buffer).unwrap().unwrap();
/// buffer.advance(consumed);
/// assert!(matches!(value, RespValue::Array(ref items) if items.len() == 2));
///
/// // The rest is still incomplete
/// assert!(parser.parse(&buffer).unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

/// A parsed value and the number of bytes it occupied, if complete.
pub type Parsed = ParseResult<Option<(RespValue, usize)>>;

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> Parsed {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> Parsed {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        match first {
            prefix::SIMPLE_STRING => {
                parse_line(buf, |line| Ok(RespValue::SimpleString(text(line)?.to_string())))
            }
            prefix::ERROR => parse_line(buf, |line| Ok(RespValue::Error(text(line)?.to_string()))),
            prefix::INTEGER => parse_line(buf, |line| Ok(RespValue::Integer(number(line)?))),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => parse_inline(buf),
        }
    }

    /// Parses `*<count>\r\n` followed by `count` nested values.
    fn parse_array(&mut self, buf: &[u8]) -> Parsed {
        let Some((line, mut consumed)) = read_line(buf, 1) else {
            return Ok(None);
        };

        let count = number(line)?;
        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        // A hostile count must not pre-allocate gigabytes
        let mut elements = Vec::with_capacity((count as usize).min(1024));

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..]) {
                Ok(Some((value, used))) => {
                    elements.push(value);
                    consumed += used;
                }
                other => {
                    self.depth -= 1;
                    return other;
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Parses a one-line value: prefix byte, body, CRLF.
fn parse_line(buf: &[u8], build: impl FnOnce(&[u8]) -> ParseResult<RespValue>) -> Parsed {
    match read_line(buf, 1) {
        Some((line, consumed)) => Ok(Some((build(line)?, consumed))),
        None => Ok(None),
    }
}

/// Parses `$<length>\r\n<data>\r\n`.
fn parse_bulk_string(buf: &[u8]) -> Parsed {
    let Some((line, data_start)) = read_line(buf, 1) else {
        return Ok(None);
    };

    let length = number(line)?;
    if length == -1 {
        return Ok(Some((RespValue::Null, data_start)));
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

    let data_end = data_start + length;
    if buf.len() < data_end + CRLF.len() {
        return Ok(None);
    }
    if &buf[data_end..data_end + CRLF.len()] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((RespValue::BulkString(data), data_end + CRLF.len())))
}

/// Parses a whitespace-separated inline command such as `PING\r\n`.
fn parse_inline(buf: &[u8]) -> Parsed {
    let Some((line, consumed)) = read_line(buf, 0) else {
        return Ok(None);
    };

    let elements: Vec<RespValue> = text(line)?
        .split_whitespace()
        .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part.as_bytes())))
        .collect();

    if elements.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".to_string()));
    }

    Ok(Some((RespValue::Array(elements), consumed)))
}

/// Returns the line starting at `start` (without CRLF) and the offset just past its CRLF.
#[inline]
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let end = rest.windows(2).position(|pair| pair == CRLF)?;
    Some((&rest[..end], start + end + CRLF.len()))
}

fn text(line: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn number(line: &[u8]) -> ParseResult<i64> {
    text(line)?
        .parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a single RESP message with a fresh parser.
pub fn parse_message(buf: &[u8]) -> Parsed {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse_message(b"+OK\r\n").unwrap(),
            Some((RespValue::SimpleString("OK".to_string()), 5))
        );
        assert_eq!(
            parse_message(b"-ERR bad\r\n").unwrap(),
            Some((RespValue::Error("ERR bad".to_string()), 10))
        );
        assert_eq!(
            parse_message(b":-42\r\n").unwrap(),
            Some((RespValue::Integer(-42), 6))
        );
    }

    #[test]
    fn test_parse_bulk_strings() {
        assert_eq!(
            parse_message(b"$5\r\nhello\r\n").unwrap(),
            Some((RespValue::BulkString(Bytes::from("hello")), 11))
        );
        assert_eq!(
            parse_message(b"$0\r\n\r\n").unwrap(),
            Some((RespValue::BulkString(Bytes::new()), 6))
        );
        assert_eq!(
            parse_message(b"$-1\r\n").unwrap(),
            Some((RespValue::Null, 5))
        );
    }

    #[test]
    fn test_bulk_string_may_contain_crlf() {
        let (value, consumed) = parse_message(b"$4\r\na\r\nb\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from_static(b"a\r\nb")));
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_incomplete_input() {
        assert_eq!(parse_message(b"").unwrap(), None);
        assert_eq!(parse_message(b"+OK").unwrap(), None);
        assert_eq!(parse_message(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_message(b"$5\r\nhello").unwrap(), None);
        assert_eq!(parse_message(b"*2\r\n$3\r\nSET\r\n").unwrap(), None);
        assert_eq!(parse_message(b"*2\r\n$3\r\nSET\r\n$1\r\nk").unwrap(), None);
    }

    #[test]
    fn test_parse_command_array() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let (value, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("SET")),
                RespValue::BulkString(Bytes::from("user:101")),
                RespValue::BulkString(Bytes::from("Ariz")),
            ])
        );
    }

    #[test]
    fn test_parse_only_first_of_pipelined_values() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_parse_nested_and_null_arrays() {
        assert_eq!(
            parse_message(b"*2\r\n:1\r\n*1\r\n:2\r\n").unwrap().unwrap().0,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2)]),
            ])
        );
        assert_eq!(parse_message(b"*-1\r\n").unwrap().unwrap().0, RespValue::Null);
        assert_eq!(
            parse_message(b"*0\r\n").unwrap().unwrap().0,
            RespValue::Array(vec![])
        );
    }

    #[test]
    fn test_parse_inline_command() {
        let (value, consumed) = parse_message(b"SET  key value\r\n").unwrap().unwrap();
        assert_eq!(consumed, 16);
        assert_eq!(
            value.into_bulk_items(),
            Some(vec![Bytes::from("SET"), Bytes::from("key"), Bytes::from("value")])
        );
        assert!(matches!(
            parse_message(b"   \r\n"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_message(b":abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert_eq!(
            parse_message(b"*x\r\n").unwrap_err().to_string(),
            "invalid integer: invalid digit found in string"
        );
        assert_eq!(
            parse_message(b"$-2\r\n"),
            Err(ParseError::InvalidBulkLength(-2))
        );
        assert_eq!(
            parse_message(b"*-5\r\n"),
            Err(ParseError::InvalidArrayLength(-5))
        );
        assert!(matches!(
            parse_message(b"$3\r\nabcXY"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_message(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_serialize_then_parse_command() {
        let frame = RespValue::command("HSET", &[Bytes::from("h"), Bytes::from_static(b"\x00\xff")]);
        let wire = frame.serialize();
        assert_eq!(parse_message(&wire).unwrap(), Some((frame, wire.len())));
    }
}
