//! Decoded client requests.
//!
//! A request is always a flat array of strings: the command name followed by
//! its arguments. Requests never contain nested arrays.

use crate::protocol::types::{prefix, CRLF};

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    parts: Vec<String>,
}

impl Request {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Builds a request from string slices.
    ///
    /// # Example
    /// ```
    /// use flintkv::protocol::Request;
    /// let req = Request::from_args(&["GET", "name"]);
    /// assert_eq!(req.name(), Some("GET"));
    /// assert_eq!(req.arg(1), Some("name"));
    /// ```
    pub fn from_args(args: &[&str]) -> Self {
        Self::new(args.iter().map(|s| s.to_string()).collect())
    }

    /// The command name (element 0), if any.
    pub fn name(&self) -> Option<&str> {
        self.arg(0)
    }

    /// Positional access. Index 0 is the command name.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    /// All elements from `index` onwards.
    pub fn args_from(&self, index: usize) -> &[String] {
        self.parts.get(index..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encodes the request as an array of bulk strings.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(prefix::ARRAY);
        buf.extend_from_slice(self.parts.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for part in &self.parts {
            buf.push(prefix::BULK_STRING);
            buf.extend_from_slice(part.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(part.as_bytes());
            buf.extend_from_slice(CRLF);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_access() {
        let req = Request::from_args(&["LPUSH", "k", "a", "b"]);
        assert_eq!(req.name(), Some("LPUSH"));
        assert_eq!(req.arg(1), Some("k"));
        assert_eq!(req.arg(4), None);
        assert_eq!(req.args_from(2), &["a".to_string(), "b".to_string()]);
        assert!(req.args_from(9).is_empty());
    }

    #[test]
    fn test_encode() {
        let req = Request::from_args(&["ECHO", "hi"]);
        assert_eq!(req.encode(), b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
        assert_eq!(Request::default().encode(), b"*0\r\n");
    }
}
