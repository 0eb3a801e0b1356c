//! Client error taxonomy.
//!
//! Connection-level errors (`Protocol`, `Connection`) fail every pending
//! request on the connection. The rest are local to one request. A nil
//! reply is never an error; it surfaces as `None` in the typed result.

use crate::resp::ProtocolError;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed reply bytes. The connection has been torn down.
    Protocol(ProtocolError),
    /// The server answered this request with an error reply.
    /// The connection remains usable.
    Server(String),
    /// The transport closed or failed. Shared by every request that was
    /// pending at the time.
    Connection(Arc<io::Error>),
    /// The caller's local deadline elapsed before the reply arrived.
    /// The request has been abandoned; its reply will be discarded.
    LocalTimeout(Duration),
    /// The reply's type does not match what the command returns.
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// The command was rejected before being written.
    InvalidArgument(String),
}

impl Error {
    /// Error used when the server closes the stream.
    pub fn closed_by_peer() -> Self {
        Error::Connection(Arc::new(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )))
    }

    /// Error used when the client side shuts the connection down.
    pub fn shut_down() -> Self {
        Error::Connection(Arc::new(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection shut down",
        )))
    }

    pub(crate) fn shape(expected: &'static str, found: &crate::resp::Frame) -> Self {
        Error::ShapeMismatch {
            expected,
            found: found.kind(),
        }
    }

    /// True if the error took the whole connection down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Connection(_))
    }

    /// True for an error reply from the server.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// True if the local deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::LocalTimeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "protocol violation: {e}"),
            Error::Server(msg) => write!(f, "server error: {msg}"),
            Error::Connection(e) => write!(f, "connection failure: {e}"),
            Error::LocalTimeout(d) => write!(f, "no reply within {} ms", d.as_millis()),
            Error::ShapeMismatch { expected, found } => {
                write!(f, "unexpected reply: expected {expected}, got {found}")
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Protocol(e) => Some(e),
            Error::Connection(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Connection(Arc::new(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::Frame;

    #[test]
    fn test_classification() {
        assert!(Error::closed_by_peer().is_fatal());
        assert!(Error::from(ProtocolError::UnknownTag(b'?')).is_fatal());
        assert!(!Error::Server("ERR".into()).is_fatal());
        assert!(Error::Server("ERR".into()).is_server_error());
        assert!(Error::LocalTimeout(Duration::from_millis(5)).is_timeout());
    }

    #[test]
    fn test_display() {
        let err = Error::shape("array", &Frame::integer(3));
        assert_eq!(err.to_string(), "unexpected reply: expected array, got integer");
        assert_eq!(
            Error::LocalTimeout(Duration::from_millis(200)).to_string(),
            "no reply within 200 ms"
        );
        assert_eq!(
            Error::closed_by_peer().to_string(),
            "connection failure: connection closed by server"
        );
    }
}
