//! Reply Types
//!
//! Every reply FlintKV sends is one of the closed set of kinds below.
//! Each kind starts with a one-byte prefix and ends with CRLF:
//!
//! - `+` Simple status: `+OK\r\n`
//! - `-` Simple error: `-Key missing\r\n`
//! - `:` Integer: `:42\r\n`
//! - `$` Bulk string: `$5\r\nhello\r\n`
//! - `_` Null: `_\r\n`
//! - `*` Array: `*2\r\n$2\r\nv0\r\n$2\r\nv1\r\n`, or `*-1\r\n` for a null array
//!
//! Arrays are encoded recursively, so a reply array may hold any reply kind,
//! nested arrays included.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by every frame.
pub const CRLF: &[u8] = b"\r\n";

/// Type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const NULL: u8 = b'_';
    pub const ARRAY: u8 = b'*';
}

/// A reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Short status text. Must not contain CRLF.
    SimpleString(String),

    /// Error text. Must not contain CRLF.
    Error(String),

    /// Signed integer.
    Integer(i64),

    /// Length-prefixed payload.
    BulkString(Bytes),

    /// Absence of a value: `_\r\n`.
    Null,

    /// Ordered elements of any kind.
    Array(Vec<RespValue>),

    /// Explicit null array: `*-1\r\n`, no elements serialized.
    NullArray,
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use flintkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error response.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use flintkv::protocol::types::RespValue;
    /// let bulk = RespValue::bulk_string("hello");
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Serializes the value to its wire form.
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
            RespValue::Null => write_line(buf, prefix::NULL, b""),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::NullArray => write_line(buf, prefix::ARRAY, b"-1"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

#[inline]
fn write_line(buf: &mut Vec<u8>, tag: u8, body: &[u8]) {
    buf.push(tag);
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
            RespValue::Null | RespValue::NullArray => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
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
