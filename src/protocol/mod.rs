//! RESP Protocol Implementation
//!
//! ShardKV speaks the Redis Serialization Protocol (RESP) on the wire and
//! uses the very same framing for its append-only journal, so one codec
//! serves both.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` enum and serialization
//! - `parser`: Incremental parser for RESP data
//!
//! ## Example
//!
//! ```
//! use shardkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(value, RespValue::command("GET", &[Bytes::from("name")]));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
