//! RESP Value Types
//!
//! Every frame ShardKV reads or writes (client requests, replies and journal
//! records) is a [`RespValue`]. A value starts with a one-byte type prefix and
//! every line ends in CRLF:
//!
//! ```text
//! +OK\r\n                                  simple string
//! -ERR unknown command 'FOO'\r\n           error
//! :1000\r\n                                integer
//! $5\r\nhello\r\n                          bulk string ($-1\r\n is null)
//! *2\r\n$3\r\nGET\r\n$4\r\nname\r\n        array
//! ```

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<string>\r\n`, cannot contain CRLF
    SimpleString(String),

    /// `-<message>\r\n`
    Error(String),

    /// `:<integer>\r\n`
    Integer(i64),

    /// `$<length>\r\n<data>\r\n`, binary-safe
    BulkString(Bytes),

    /// `$-1\r\n` on the way out, `$-1` or `*-1` on the way in
    Null,

    /// `*<count>\r\n<element>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new simple string response.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error response.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::RespValue;
    /// let err = RespValue::error("ERR unknown command 'FOO'");
    /// assert_eq!(err.serialize(), b"-ERR unknown command 'FOO'\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// An array of bulk strings, one per item.
    pub fn bulk_array(items: impl IntoIterator<Item = Bytes>) -> Self {
        RespValue::Array(items.into_iter().map(RespValue::BulkString).collect())
    }

    /// A command frame: the name followed by its arguments, all as bulk strings.
    ///
    /// This is the shape of both client requests and journal records.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::RespValue;
    /// use bytes::Bytes;
    ///
    /// let frame = RespValue::command("SET", &[Bytes::from("k"), Bytes::from("v")]);
    /// assert_eq!(frame.serialize(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    /// ```
    pub fn command(name: &str, args: &[Bytes]) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(RespValue::BulkString(Bytes::copy_from_slice(name.as_bytes())));
        items.extend(args.iter().cloned().map(RespValue::BulkString));
        RespValue::Array(items)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Extracts the bytes of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Consumes an array of bulk strings into its items.
    ///
    /// Returns `None` if this is not an array or any element is not a bulk string.
    pub fn into_bulk_items(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(values) => values
                .into_iter()
                .map(|value| match value {
                    RespValue::BulkString(data) => Some(data),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, type_prefix: u8, body: &[u8]) {
    buf.push(type_prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_serialize() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
        assert_eq!(
            RespValue::error("ERR unknown command 'FOO'").serialize(),
            b"-ERR unknown command 'FOO'\r\n"
        );
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_bulk_string_is_binary_safe() {
        let value = RespValue::bulk_string(Bytes::from_static(b"a\r\n\x00b"));
        assert_eq!(value.serialize(), b"$5\r\na\r\n\x00b\r\n");
    }

    #[test]
    fn test_command_frame() {
        let frame = RespValue::command("LPUSH", &[Bytes::from("list"), Bytes::from("x")]);
        assert_eq!(
            frame.serialize(),
            b"*3\r\n$5\r\nLPUSH\r\n$4\r\nlist\r\n$1\r\nx\r\n"
        );
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::bulk_array(vec![Bytes::from("a"), Bytes::from("b")]),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n:1\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[test]
    fn test_into_bulk_items() {
        let frame = RespValue::command("DEL", &[Bytes::from("k")]);
        assert_eq!(
            frame.into_bulk_items(),
            Some(vec![Bytes::from("DEL"), Bytes::from("k")])
        );

        let mixed = RespValue::array(vec![RespValue::bulk_string("SET"), RespValue::integer(1)]);
        assert_eq!(mixed.into_bulk_items(), None);
        assert_eq!(RespValue::integer(1).into_bulk_items(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(RespValue::null().to_string(), "(nil)");
        assert_eq!(RespValue::integer(3).to_string(), "(integer) 3");
        assert_eq!(
            RespValue::bulk_array(vec![Bytes::from("a"), Bytes::from("b")]).to_string(),
            "1) \"a\"\n2) \"b\""
        );
    }
}
