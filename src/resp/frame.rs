//! Decoded RESP reply values.
//!
//! A `Frame` is the boundary between wire bytes and typed client results.
//! Nil bulk strings and nil arrays are `None`, which keeps them distinct
//! from the empty string and the empty array.

use bytes::{Bytes, BytesMut};

/// RESP frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string: +OK\r\n
    ///
    /// Bytes that are not valid UTF-8 are replaced with U+FFFD, so the text
    /// may not round-trip to the exact wire bytes.
    Simple(String),
    /// Error: -ERR message\r\n
    ///
    /// Decoded lossily, like `Simple`.
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n or $-1\r\n (null)
    Bulk(Option<Bytes>),
    /// Array: *2\r\n... or *-1\r\n (null)
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Encode a frame to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode a frame into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                buf.extend_from_slice(b"+");
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                buf.extend_from_slice(b"-");
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                buf.extend_from_slice(b":");
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            Frame::Bulk(Some(data)) => {
                buf.extend_from_slice(b"$");
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
            Frame::Array(Some(frames)) => {
                buf.extend_from_slice(b"*");
                buf.extend_from_slice(frames.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for frame in frames {
                    frame.encode_into(buf);
                }
            }
        }
    }

    /// Short name of the frame's shape, used in shape mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(None) => "nil bulk string",
            Frame::Bulk(Some(_)) => "bulk string",
            Frame::Array(None) => "nil array",
            Frame::Array(Some(_)) => "array",
        }
    }

    /// True for `$-1` and `*-1`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Frame::Bulk(None) | Frame::Array(None))
    }

    /// Create a simple string frame
    pub fn simple<S: Into<String>>(s: S) -> Frame {
        Frame::Simple(s.into())
    }

    /// Create an error frame
    pub fn error<S: Into<String>>(s: S) -> Frame {
        Frame::Error(s.into())
    }

    /// Create a null bulk string frame
    pub fn null() -> Frame {
        Frame::Bulk(None)
    }

    /// Create a null array frame
    pub fn null_array() -> Frame {
        Frame::Array(None)
    }

    /// Create a bulk string frame
    pub fn bulk<B: Into<Bytes>>(data: B) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    /// Create an integer frame
    pub fn integer(n: i64) -> Frame {
        Frame::Integer(n)
    }

    /// Create an array frame
    pub fn array(frames: Vec<Frame>) -> Frame {
        Frame::Array(Some(frames))
    }
}
