//! RESP (Redis Serialization Protocol) implementation.
//!
//! Client side of RESP2: commands are encoded as multi-bulk arrays and
//! replies are decoded incrementally, optionally streaming array elements.

pub mod command;
pub mod frame;
pub mod parser;

pub use command::Command;
pub use frame::Frame;
pub use parser::{Decoder, ProtocolError, StreamItem};
