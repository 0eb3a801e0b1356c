//! Request pipelining over a single connection.
//!
//! - `queue`: FIFO of pending requests, matched to replies in order
//! - `sink`: where a reply is delivered (whole frame or streamed elements)
//! - `coordinator`: handles that wait on a request with a local deadline

pub mod coordinator;
pub mod queue;
pub mod sink;

pub use coordinator::{Pending, ReplyHandle, RequestState, StreamHandle};
pub use queue::{DecodeMode, Delivery, PipelineQueue, RequestId};
pub use sink::{channel_consumer, ValueConsumer};
