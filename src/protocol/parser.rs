//! Frame Parser
//!
//! Two entry points share the same buffer-driven design:
//!
//! - [`RespParser::parse_request`] decodes a client request frame: `*<N>\r\n`
//!   followed by exactly N bulk strings. This is the strict path the server uses.
//! - [`RespParser::parse_reply`] decodes any reply kind, recursively. Clients and
//!   tests use it to read what the server wrote.
//!
//! Both return:
//! - `Ok(Some((value, consumed)))` - a full frame was decoded from `consumed` bytes
//! - `Ok(None)` - the frame is not complete yet, read more and retry
//! - `Err(ParseError)` - the bytes can never form a valid frame
//!
//! Length tokens in request frames are digits only. A missing token, a
//! non-digit byte where CRLF should follow, a missing `$` tag or a missing CRLF
//! after the payload all abort the whole request.

use crate::protocol::request::Request;
use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a frame.
///
/// The display text is the syntax failure reason reported to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request does not start with `*`.
    #[error("commands are Resp Arrays")]
    NotAnArray,

    /// A length token had no digits.
    #[error("Missing length of data.")]
    MissingLength,

    /// A length token was not followed by CRLF.
    #[error("Missing CRLF before data.")]
    MissingCrlfBeforeData,

    /// A payload was not followed by CRLF.
    #[error("Missing CRLF after data.")]
    MissingCrlfAfterData,

    /// An element did not start with the expected tag.
    #[error("Invalid type char for Resp data type.")]
    InvalidTypeChar,

    #[error("invalid UTF-8 in bulk string")]
    InvalidUtf8,

    /// A length token does not fit in memory.
    #[error("length out of range: {0}")]
    LengthOutOfRange(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Unknown reply prefix byte.
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (64 MB).
pub const MAX_BULK_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of elements in one request.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum reply nesting depth.
pub const MAX_NESTING_DEPTH: usize = 32;

/// A frame parser.
///
/// # Example
///
/// ```
/// use flintkv::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
/// let (request, consumed) = parser.parse_request(buf).unwrap().unwrap();
/// assert_eq!(request.name(), Some("GET"));
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one request frame from the start of `buf`.
    pub fn parse_request(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != prefix::ARRAY {
            return Err(ParseError::NotAnArray);
        }

        let Some((count, mut consumed)) = read_length(buf, 1)? else {
            return Ok(None);
        };
        if count > MAX_ARRAY_LEN {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARRAY_LEN,
            });
        }

        let mut parts = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            match read_bulk(buf, consumed)? {
                Some((part, next)) => {
                    parts.push(part);
                    consumed = next;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((Request::new(parts), consumed)))
    }

    /// Attempts to decode one reply of any kind from the start of `buf`.
    pub fn parse_reply(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }

        match tag {
            prefix::SIMPLE_STRING => Ok(read_line(buf)?
                .map(|(s, used)| (RespValue::SimpleString(s.to_string()), used))),
            prefix::ERROR => {
                Ok(read_line(buf)?.map(|(s, used)| (RespValue::Error(s.to_string()), used)))
            }
            prefix::INTEGER => match read_line(buf)? {
                Some((s, used)) => {
                    let n = s
                        .parse::<i64>()
                        .map_err(|e| ParseError::InvalidInteger(e.to_string()))?;
                    Ok(Some((RespValue::Integer(n), used)))
                }
                None => Ok(None),
            },
            prefix::NULL => match read_line(buf)? {
                Some(("", used)) => Ok(Some((RespValue::Null, used))),
                Some(_) => Err(ParseError::MissingCrlfAfterData),
                None => Ok(None),
            },
            prefix::BULK_STRING => self.parse_bulk_reply(buf),
            prefix::ARRAY => self.parse_array_reply(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    fn parse_bulk_reply(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match null_length(&buf[1..]) {
            Some(true) => return Ok(Some((RespValue::Null, NULL_LENGTH.len() + 1))),
            Some(false) => return Ok(None),
            None => {}
        }
        let Some((length, start)) = read_length(buf, 1)? else {
            return Ok(None);
        };
        let Some(data) = read_payload(buf, start, length)? else {
            return Ok(None);
        };
        let consumed = start + length + CRLF.len();
        Ok(Some((
            RespValue::BulkString(Bytes::copy_from_slice(data)),
            consumed,
        )))
    }

    fn parse_array_reply(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match null_length(&buf[1..]) {
            Some(true) => return Ok(Some((RespValue::NullArray, NULL_LENGTH.len() + 1))),
            Some(false) => return Ok(None),
            None => {}
        }
        let Some((count, mut consumed)) = read_length(buf, 1)? else {
            return Ok(None);
        };

        let mut elements = Vec::with_capacity(count.min(64));
        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

const NULL_LENGTH: &[u8] = b"-1\r\n";

/// Matches the `-1` null length after a `$` or `*` tag.
///
/// `Some(true)` once the whole marker is buffered, `Some(false)` while the
/// input is still a prefix of it.
fn null_length(rest: &[u8]) -> Option<bool> {
    if rest.starts_with(NULL_LENGTH) {
        Some(true)
    } else if !rest.is_empty() && NULL_LENGTH.starts_with(rest) {
        Some(false)
    } else {
        None
    }
}

/// Reads a digits-only length token starting at `pos`, followed by CRLF.
///
/// Returns the length and the offset just past the CRLF.
fn read_length(buf: &[u8], pos: usize) -> ParseResult<Option<(usize, usize)>> {
    let digits = buf[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
    let end = pos + digits;

    if end >= buf.len() {
        // Still reading digits, or the terminator has not arrived.
        return Ok(None);
    }
    if digits == 0 {
        return Err(ParseError::MissingLength);
    }
    if buf[end] != b'\r' {
        return Err(ParseError::MissingCrlfBeforeData);
    }
    match buf.get(end + 1) {
        None => return Ok(None),
        Some(b'\n') => {}
        Some(_) => return Err(ParseError::MissingCrlfBeforeData),
    }

    // Digits only, so this is ASCII.
    let token = std::str::from_utf8(&buf[pos..end]).map_err(|_| ParseError::InvalidUtf8)?;
    let length = token
        .parse::<usize>()
        .map_err(|_| ParseError::LengthOutOfRange(token.to_string()))?;

    Ok(Some((length, end + CRLF.len())))
}

/// Reads `$<len>\r\n<len bytes>\r\n` starting at `pos`.
fn read_bulk(buf: &[u8], pos: usize) -> ParseResult<Option<(String, usize)>> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    if tag != prefix::BULK_STRING {
        return Err(ParseError::InvalidTypeChar);
    }

    let Some((length, start)) = read_length(buf, pos + 1)? else {
        return Ok(None);
    };
    let Some(data) = read_payload(buf, start, length)? else {
        return Ok(None);
    };

    let text = std::str::from_utf8(data).map_err(|_| ParseError::InvalidUtf8)?;
    Ok(Some((text.to_string(), start + length + CRLF.len())))
}

/// Returns the `length` bytes at `start` once they and their CRLF are buffered.
fn read_payload(buf: &[u8], start: usize, length: usize) -> ParseResult<Option<&[u8]>> {
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let end = start + length;
    if buf.len() < end + CRLF.len() {
        // A wrong byte already in place is an error even before the rest arrives.
        if buf.len() > end && buf[end] != b'\r' {
            return Err(ParseError::MissingCrlfAfterData);
        }
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::MissingCrlfAfterData);
    }
    Ok(Some(&buf[start..end]))
}

/// Reads a `<tag><text>\r\n` line. Returns the text and the bytes consumed.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let text =
                std::str::from_utf8(&buf[1..1 + pos]).map_err(|_| ParseError::InvalidUtf8)?;
            Ok(Some((text, 1 + pos + CRLF.len())))
        }
        None => Ok(None),
    }
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single request frame. See [`RespParser::parse_request`].
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RespParser::new().parse_request(buf)
}

/// Decodes a single reply. See [`RespParser::parse_reply`].
pub fn parse_reply(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse_reply(buf)
}
