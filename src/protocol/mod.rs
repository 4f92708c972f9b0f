//! Wire Protocol Codec
//!
//! Requests arrive as an array of bulk strings; replies leave as one of the
//! reply kinds in [`types`].
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply enum and its encoder
//! - `request`: the decoded `Request` and its encoder
//! - `parser`: buffer-driven decoders for requests and replies
//!
//! ## Example
//!
//! ```
//! use flintkv::protocol::{parse_request, RespValue};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(request.name(), Some("GET"));
//! assert_eq!(consumed, data.len());
//!
//! let reply = RespValue::bulk_string("Ariz");
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod request;
pub mod types;

pub use parser::{parse_reply, parse_request, ParseError, ParseResult, RespParser};
pub use request::Request;
pub use types::RespValue;
