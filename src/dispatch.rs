//! Typed reply shapes.
//!
//! Every command is sent the same way; what differs is how its reply is
//! read back. `FromReply` describes one reply shape. Error replies never
//! reach it: they become `Error::Server` when the reply is routed.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::resp::Frame;

/// Conversion from a decoded reply to a typed result.
///
/// A frame of the wrong type is an `Error::ShapeMismatch`, never coerced.
pub trait FromReply: Sized {
    fn from_reply(frame: Frame) -> Result<Self>;
}

/// The raw frame, unconverted.
impl FromReply for Frame {
    fn from_reply(frame: Frame) -> Result<Self> {
        Ok(frame)
    }
}

/// Integer replies: lengths and counts.
impl FromReply for i64 {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Integer(n) => Ok(n),
            other => Err(Error::shape("integer", &other)),
        }
    }
}

/// Status replies such as `+OK`.
impl FromReply for String {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Simple(status) => Ok(status),
            other => Err(Error::shape("simple string", &other)),
        }
    }
}

/// A bulk string that must be present.
impl FromReply for Bytes {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Bulk(Some(value)) => Ok(value),
            other => Err(Error::shape("bulk string", &other)),
        }
    }
}

/// A value that may be absent.
///
/// Blocking rotations answer a timeout with a nil array rather than a nil
/// bulk string, so both count as absent.
impl FromReply for Option<Bytes> {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Bulk(value) => Ok(value),
            Frame::Array(None) => Ok(None),
            other => Err(Error::shape("bulk string", &other)),
        }
    }
}

/// An array of bulk strings.
impl FromReply for Vec<Bytes> {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Array(Some(items)) => items.into_iter().map(Bytes::from_reply).collect(),
            other => Err(Error::shape("array", &other)),
        }
    }
}

/// A popped element and the list it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

/// Blocking pops answer with `[key, value]`, or a nil array on timeout.
impl FromReply for Option<KeyValue> {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Array(None) => Ok(None),
            Frame::Array(Some(items)) if items.len() == 2 => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(key), Some(value)) => Ok(Some(KeyValue {
                        key: Bytes::from_reply(key)?,
                        value: Bytes::from_reply(value)?,
                    })),
                    _ => Err(Error::ShapeMismatch {
                        expected: "two-element array",
                        found: "array",
                    }),
                }
            }
            Frame::Array(Some(_)) => Err(Error::ShapeMismatch {
                expected: "two-element array",
                found: "array",
            }),
            other => Err(Error::shape("two-element array", &other)),
        }
    }
}

/// Result of inserting next to a pivot element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Inserted; the list now holds this many elements.
    Length(i64),
    /// The pivot is not in the list. Nothing was inserted.
    PivotNotFound,
    /// The key does not exist. Nothing was inserted.
    NoSuchKey,
}

impl FromReply for InsertOutcome {
    fn from_reply(frame: Frame) -> Result<Self> {
        match frame {
            Frame::Integer(-1) => Ok(InsertOutcome::PivotNotFound),
            Frame::Integer(0) => Ok(InsertOutcome::NoSuchKey),
            Frame::Integer(n) if n > 0 => Ok(InsertOutcome::Length(n)),
            Frame::Integer(_) => Err(Error::ShapeMismatch {
                expected: "list length or -1",
                found: "negative integer",
            }),
            other => Err(Error::shape("integer", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &'static str) -> Frame {
        Frame::bulk(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_integer() {
        assert_eq!(i64::from_reply(Frame::integer(2)).unwrap(), 2);
        assert!(matches!(
            i64::from_reply(bulk("2")),
            Err(Error::ShapeMismatch {
                expected: "integer",
                found: "bulk string"
            })
        ));
    }

    #[test]
    fn test_nil_is_absent_not_empty() {
        assert_eq!(Option::<Bytes>::from_reply(Frame::null()).unwrap(), None);
        assert_eq!(
            Option::<Bytes>::from_reply(Frame::null_array()).unwrap(),
            None
        );
        assert_eq!(
            Option::<Bytes>::from_reply(Frame::bulk(Bytes::new())).unwrap(),
            Some(Bytes::new())
        );
        assert!(Bytes::from_reply(Frame::null()).is_err());
    }

    #[test]
    fn test_array_of_bulks() {
        let frame = Frame::array(vec![bulk("a"), bulk("b")]);
        assert_eq!(
            Vec::<Bytes>::from_reply(frame).unwrap(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]
        );
        assert!(Vec::<Bytes>::from_reply(Frame::array(vec![])).unwrap().is_empty());
        assert!(Vec::<Bytes>::from_reply(Frame::null_array()).is_err());
        assert!(Vec::<Bytes>::from_reply(Frame::array(vec![Frame::integer(1)])).is_err());
    }

    #[test]
    fn test_key_value() {
        let popped = Option::<KeyValue>::from_reply(Frame::array(vec![bulk("q"), bulk("job")]))
            .unwrap()
            .unwrap();
        assert_eq!(popped.key, Bytes::from_static(b"q"));
        assert_eq!(popped.value, Bytes::from_static(b"job"));

        assert_eq!(Option::<KeyValue>::from_reply(Frame::null_array()).unwrap(), None);

        // Present but empty is not the same as absent.
        let empty = Option::<KeyValue>::from_reply(Frame::array(vec![bulk(""), bulk("")]))
            .unwrap();
        assert!(empty.is_some());

        assert!(Option::<KeyValue>::from_reply(Frame::array(vec![bulk("q")])).is_err());
        assert!(Option::<KeyValue>::from_reply(Frame::null()).is_err());
    }

    #[test]
    fn test_insert_sentinels() {
        assert_eq!(
            InsertOutcome::from_reply(Frame::integer(-1)).unwrap(),
            InsertOutcome::PivotNotFound
        );
        assert_eq!(
            InsertOutcome::from_reply(Frame::integer(0)).unwrap(),
            InsertOutcome::NoSuchKey
        );
        assert_eq!(
            InsertOutcome::from_reply(Frame::integer(4)).unwrap(),
            InsertOutcome::Length(4)
        );
        assert!(InsertOutcome::from_reply(Frame::integer(-2)).is_err());
    }

    #[test]
    fn test_status() {
        assert_eq!(String::from_reply(Frame::simple("OK")).unwrap(), "OK");
        assert!(String::from_reply(bulk("OK")).is_err());
    }
}
