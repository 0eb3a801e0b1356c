//! RESP (Redis Serialization Protocol) reply parser.
//!
//! `parse` is a pure function over a byte slice: it either returns one
//! complete frame with the number of bytes it occupies, reports that more
//! bytes are needed, or reports a protocol violation.
//!
//! `Decoder` wraps an append-only input buffer around `parse` so that bytes
//! can arrive in arbitrary chunks. Arrays are built up across reads: each
//! element's bytes are consumed once it is complete, so a large reply is
//! never re-parsed from its start. The decoder can also stream an array
//! reply element by element instead of materializing it.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

use super::frame::Frame;

/// Largest bulk string accepted by default (the server's proto-max-bulk-len).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Upper bound on preallocated array capacity; larger arrays grow as parsed.
const MAX_PREALLOC: usize = 1024;

/// Malformed input on the wire. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Leading byte is not one of `+ - : $ *`
    UnknownTag(u8),
    /// Length header is not a decimal number
    InvalidLength(String),
    /// Integer reply is not a decimal number
    InvalidInteger(String),
    /// Negative length other than the -1 nil sentinel
    NegativeLength(i64),
    /// Bulk payload not followed by CRLF
    MissingTerminator,
    /// Bulk string longer than the configured maximum
    BulkTooLarge(usize),
    /// A reply arrived with no request waiting for it
    UnsolicitedReply,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownTag(b) => {
                write!(f, "unknown frame type byte 0x{b:02x} ({:?})", *b as char)
            }
            ProtocolError::InvalidLength(s) => write!(f, "invalid length: {s}"),
            ProtocolError::InvalidInteger(s) => write!(f, "invalid integer: {s}"),
            ProtocolError::NegativeLength(n) => write!(f, "invalid negative length: {n}"),
            ProtocolError::MissingTerminator => write!(f, "bulk string missing trailing CRLF"),
            ProtocolError::BulkTooLarge(n) => write!(f, "bulk string of {n} bytes exceeds limit"),
            ProtocolError::UnsolicitedReply => write!(f, "reply received with no pending request"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed a frame with bytes consumed
    Complete(Frame, usize),
    /// Need more data
    Incomplete,
    /// Parse error
    Error(ProtocolError),
}

/// Parse a RESP frame from a buffer
pub fn parse(buffer: &[u8], max_bulk_len: usize) -> ParseResult {
    if buffer.is_empty() {
        return ParseResult::Incomplete;
    }

    match buffer[0] {
        b'+' => parse_line(buffer, Frame::Simple),
        b'-' => parse_line(buffer, Frame::Error),
        b':' => parse_integer(buffer),
        b'$' => parse_bulk_string(buffer, max_bulk_len),
        b'*' => parse_array(buffer, max_bulk_len),
        other => ParseResult::Error(ProtocolError::UnknownTag(other)),
    }
}

/// Find CRLF in buffer, return position of \r
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Parse a `+` or `-` line. Invalid UTF-8 becomes U+FFFD.
fn parse_line(buffer: &[u8], make: fn(String) -> Frame) -> ParseResult {
    match find_crlf(buffer) {
        Some(end) => {
            let text = String::from_utf8_lossy(&buffer[1..end]).into_owned();
            ParseResult::Complete(make(text), end + 2)
        }
        None => ParseResult::Incomplete,
    }
}

/// Parse an integer: :1000\r\n
fn parse_integer(buffer: &[u8]) -> ParseResult {
    let Some(end) = find_crlf(buffer) else {
        return ParseResult::Incomplete;
    };
    match parse_decimal(&buffer[1..end]) {
        Some(n) => ParseResult::Complete(Frame::Integer(n), end + 2),
        None => ParseResult::Error(ProtocolError::InvalidInteger(
            String::from_utf8_lossy(&buffer[1..end]).into_owned(),
        )),
    }
}

fn parse_decimal(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse::<i64>().ok()
}

/// Parse the `$<len>\r\n` or `*<count>\r\n` header line.
///
/// Returns the declared length (-1 for nil) and the header size, or `None`
/// if the line is not complete yet.
fn parse_header(buffer: &[u8]) -> Result<Option<(i64, usize)>, ProtocolError> {
    let Some(end) = find_crlf(buffer) else {
        return Ok(None);
    };
    let len = parse_decimal(&buffer[1..end]).ok_or_else(|| {
        ProtocolError::InvalidLength(String::from_utf8_lossy(&buffer[1..end]).into_owned())
    })?;
    if len < -1 {
        return Err(ProtocolError::NegativeLength(len));
    }
    Ok(Some((len, end + 2)))
}

/// Parse a bulk string: $5\r\nhello\r\n or $-1\r\n
fn parse_bulk_string(buffer: &[u8], max_bulk_len: usize) -> ParseResult {
    let (len, header) = match parse_header(buffer) {
        Ok(Some(h)) => h,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(e),
    };

    if len == -1 {
        return ParseResult::Complete(Frame::Bulk(None), header);
    }

    let len = len as usize;
    if len > max_bulk_len {
        return ParseResult::Error(ProtocolError::BulkTooLarge(len));
    }

    let data_end = header + len;
    let total_len = data_end + 2;

    if buffer.len() < total_len {
        return ParseResult::Incomplete;
    }

    if &buffer[data_end..total_len] != b"\r\n" {
        return ParseResult::Error(ProtocolError::MissingTerminator);
    }

    let data = Bytes::copy_from_slice(&buffer[header..data_end]);
    ParseResult::Complete(Frame::Bulk(Some(data)), total_len)
}

/// Parse an array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n or *-1\r\n
fn parse_array(buffer: &[u8], max_bulk_len: usize) -> ParseResult {
    let (len, header) = match parse_header(buffer) {
        Ok(Some(h)) => h,
        Ok(None) => return ParseResult::Incomplete,
        Err(e) => return ParseResult::Error(e),
    };

    if len == -1 {
        return ParseResult::Complete(Frame::Array(None), header);
    }

    let len = len as usize;
    let mut offset = header;
    let mut frames = Vec::with_capacity(len.min(MAX_PREALLOC));

    for _ in 0..len {
        match parse(&buffer[offset..], max_bulk_len) {
            ParseResult::Complete(frame, consumed) => {
                frames.push(frame);
                offset += consumed;
            }
            other => return other,
        }
    }

    ParseResult::Complete(Frame::Array(Some(frames)), offset)
}

/// One step of a streamed array reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// The next element of the array, in server order.
    Element(Frame),
    /// The array is finished; carries the number of elements delivered.
    Done(usize),
    /// The reply was not a sized array (nil array, error, or another type)
    /// and is returned whole.
    Whole(Frame),
}

#[derive(Debug)]
struct ArrayProgress {
    remaining: usize,
    delivered: usize,
}

/// An array whose header has been consumed but whose elements are not all in.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    frames: Vec<Frame>,
}

/// Re-entrant reply decoder over an append-only input buffer.
///
/// The buffer is owned by whichever task reads from the transport. Bytes
/// are only removed from it once a frame (or a streamed element) is
/// complete, so a partial frame is never lost between reads.
#[derive(Debug)]
pub struct Decoder {
    buffer: BytesMut,
    max_bulk_len: usize,
    stream: Option<ArrayProgress>,
    /// Open arrays, outermost first.
    partial: Vec<PartialArray>,
}

impl Decoder {
    pub fn new(capacity: usize, max_bulk_len: usize) -> Self {
        Decoder {
            buffer: BytesMut::with_capacity(capacity),
            max_bulk_len,
            stream: None,
            partial: Vec::new(),
        }
    }

    /// Buffer to read transport bytes into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes to the input buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a streamed array is partway through.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the decoder is between replies, with nothing half-read.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.stream.is_none() && self.partial.is_empty()
    }

    /// Decode the next complete frame, if the buffer holds one.
    ///
    /// Array elements are consumed as they complete and kept until the
    /// array is whole, so a later call resumes where this one stopped.
    pub fn decode(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let Some(&tag) = self.buffer.first() else {
                return Ok(None);
            };
            let mut frame = if tag == b'*' {
                let Some((len, header)) = parse_header(&self.buffer)? else {
                    return Ok(None);
                };
                self.buffer.advance(header);
                match len {
                    -1 => Frame::Array(None),
                    0 => Frame::Array(Some(Vec::new())),
                    len => {
                        let len = len as usize;
                        self.partial.push(PartialArray {
                            remaining: len,
                            frames: Vec::with_capacity(len.min(MAX_PREALLOC)),
                        });
                        continue;
                    }
                }
            } else {
                match parse(&self.buffer, self.max_bulk_len) {
                    ParseResult::Complete(frame, consumed) => {
                        self.buffer.advance(consumed);
                        frame
                    }
                    ParseResult::Incomplete => return Ok(None),
                    ParseResult::Error(e) => return Err(e),
                }
            };

            // Close every array this frame completes.
            loop {
                let Some(mut array) = self.partial.pop() else {
                    return Ok(Some(frame));
                };
                array.frames.push(frame);
                array.remaining -= 1;
                if array.remaining > 0 {
                    self.partial.push(array);
                    break;
                }
                frame = Frame::Array(Some(array.frames));
            }
        }
    }

    /// Decode the next step of a streamed reply.
    ///
    /// For a sized array, yields each element as soon as its bytes are
    /// complete, then `Done(count)`. Any other reply is yielded as `Whole`.
    pub fn decode_streaming(&mut self) -> Result<Option<StreamItem>, ProtocolError> {
        if let Some(progress) = &self.stream {
            if progress.remaining == 0 {
                let delivered = progress.delivered;
                self.stream = None;
                return Ok(Some(StreamItem::Done(delivered)));
            }
            // Elements may themselves be arrays, which resume like any other.
            let Some(frame) = self.decode()? else {
                return Ok(None);
            };
            if let Some(progress) = &mut self.stream {
                progress.remaining -= 1;
                progress.delivered += 1;
            }
            return Ok(Some(StreamItem::Element(frame)));
        }
        if !self.partial.is_empty() {
            return Ok(self.decode()?.map(StreamItem::Whole));
        }

        let first = self.buffer.first().copied();
        match first {
            None => Ok(None),
            Some(b'*') => match parse_header(&self.buffer)? {
                None => Ok(None),
                Some((-1, header)) => {
                    self.buffer.advance(header);
                    Ok(Some(StreamItem::Whole(Frame::Array(None))))
                }
                Some((len, header)) => {
                    self.buffer.advance(header);
                    self.stream = Some(ArrayProgress {
                        remaining: len as usize,
                        delivered: 0,
                    });
                    self.decode_streaming()
                }
            },
            Some(_) => Ok(self.decode()?.map(StreamItem::Whole)),
        }
    }
}
