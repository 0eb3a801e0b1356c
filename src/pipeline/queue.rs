//! FIFO queue of requests awaiting replies on one connection.
//!
//! RESP answers requests on a connection strictly in the order they were
//! written, so the head of the queue always owns the next reply off the
//! wire. The queue never reorders.
//!
//! Slots live in a slab so a handle can find its request in O(1) to
//! abandon it. Each slot carries a sequence number; a `RequestId` only
//! matches the slot it was issued for, even after the slab key is reused.

use slab::Slab;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use super::sink::Sink;
use crate::error::Error;
use crate::resp::{Frame, ProtocolError};

/// Queue shared between callers (enqueue, abandon) and the read task.
pub(crate) type SharedQueue = Arc<Mutex<PipelineQueue>>;

/// Lock the shared queue. Nothing panics while holding it, but a poisoned
/// lock still guards a consistent queue.
pub(crate) fn lock(queue: &SharedQueue) -> MutexGuard<'_, PipelineQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies one submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    key: usize,
    seq: u64,
}

impl RequestId {
    /// Submission sequence number on this connection, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.seq)
    }
}

/// How the read task should decode the reply for the head request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode the reply as one frame.
    Whole,
    /// Hand array elements over one at a time.
    Streaming,
}

/// Outcome of routing a reply to the head request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiting caller received the reply.
    Delivered,
    /// The request had been abandoned; the reply was dropped.
    Discarded,
}

struct Slot {
    seq: u64,
    mode: DecodeMode,
    /// `None` once abandoned, or while the read task holds a streaming sink.
    sink: Option<Sink>,
    abandoned: bool,
}

/// Ordered pending requests for one connection.
pub struct PipelineQueue {
    slots: Slab<Slot>,
    order: VecDeque<usize>,
    next_seq: u64,
    closed: Option<Error>,
}

impl PipelineQueue {
    pub(crate) fn new() -> Self {
        PipelineQueue {
            slots: Slab::new(),
            order: VecDeque::new(),
            next_seq: 1,
            closed: None,
        }
    }

    /// Number of requests still waiting for a reply, abandoned ones included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The error the connection was closed with, if it has been.
    pub fn closed_error(&self) -> Option<&Error> {
        self.closed.as_ref()
    }

    /// Append a request. The caller must write its command to the wire
    /// while still holding the queue lock so wire order matches queue order.
    pub(crate) fn enqueue(&mut self, sink: Sink) -> Result<RequestId, Error> {
        if let Some(err) = &self.closed {
            return Err(err.clone());
        }
        let mode = match sink {
            Sink::Once(_) => DecodeMode::Whole,
            Sink::Stream(_) => DecodeMode::Streaming,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.slots.insert(Slot {
            seq,
            mode,
            sink: Some(sink),
            abandoned: false,
        });
        self.order.push_back(key);
        Ok(RequestId { key, seq })
    }

    /// Decode mode for the next reply, or `None` if nothing is pending.
    pub fn head_mode(&self) -> Option<DecodeMode> {
        self.order.front().map(|&key| self.slots[key].mode)
    }

    /// Route a complete reply to the head request and remove it.
    ///
    /// A reply with nothing pending means the stream is out of step with
    /// the queue, which is fatal.
    pub(crate) fn on_frame_decoded(&mut self, frame: Frame) -> Result<Delivery, ProtocolError> {
        let slot = self.pop_head()?;
        let delivered = match slot.sink {
            Some(sink) => sink.deliver(frame),
            None => false,
        };
        if delivered {
            Ok(Delivery::Delivered)
        } else {
            debug!(request = slot.seq, "Discarding reply for abandoned request");
            Ok(Delivery::Discarded)
        }
    }

    /// Take the head request's sink so the read task can stream elements
    /// into it without holding the lock. The slot stays queued until
    /// `on_stream_done`.
    pub(crate) fn take_head_sink(&mut self) -> Result<Option<Sink>, ProtocolError> {
        let key = *self.order.front().ok_or(ProtocolError::UnsolicitedReply)?;
        Ok(self.slots[key].sink.take())
    }

    /// A streamed reply finished. Removes the head slot and returns its
    /// sink if it was never taken.
    pub(crate) fn on_stream_done(&mut self) -> Result<Option<Sink>, ProtocolError> {
        let slot = self.pop_head()?;
        if slot.abandoned {
            debug!(request = slot.seq, "Discarded streamed reply for abandoned request");
        }
        Ok(slot.sink)
    }

    /// Withdraw a pending request. Its reply, when it arrives, is dropped.
    ///
    /// Returns false if the request already resolved or was abandoned.
    pub(crate) fn abandon(&mut self, id: RequestId) -> bool {
        match self.slots.get_mut(id.key) {
            Some(slot) if slot.seq == id.seq && !slot.abandoned => {
                slot.abandoned = true;
                slot.sink = None;
                trace!(request = id.seq, "Request abandoned");
                true
            }
            _ => false,
        }
    }

    /// Refuse new requests from now on. Pending ones are left for
    /// `on_connection_closed`.
    pub(crate) fn mark_closed(&mut self, err: &Error) {
        if self.closed.is_none() {
            self.closed = Some(err.clone());
        }
    }

    /// Fail every pending request in FIFO order and refuse new ones.
    ///
    /// Only the first close is recorded; later calls are no-ops apart from
    /// failing anything still queued.
    pub(crate) fn on_connection_closed(&mut self, err: &Error) -> usize {
        if self.closed.is_none() {
            self.closed = Some(err.clone());
        }
        let mut failed = 0;
        while let Some(key) = self.order.pop_front() {
            let slot = self.slots.remove(key);
            if let Some(sink) = slot.sink {
                if !sink.is_closed() {
                    failed += 1;
                }
                sink.fail(err.clone());
            }
        }
        failed
    }

    fn pop_head(&mut self) -> Result<Slot, ProtocolError> {
        let key = self
            .order
            .pop_front()
            .ok_or(ProtocolError::UnsolicitedReply)?;
        Ok(self.slots.remove(key))
    }
}
