//! Waiting on pending requests, with an optional local deadline.
//!
//! Blocking commands carry two independent timers. The server timeout is a
//! command argument and bounds how long the server parks the request. The
//! local deadline bounds how long the caller waits. When the local deadline
//! fires first the request is abandoned: it keeps its place in the pipeline
//! (the server still owes a reply) but that reply is dropped on arrival.
//!
//! Replies on one connection arrive in request order, so a parked blocking
//! command holds back the replies of everything queued behind it. Callers
//! that must not wait behind a blocking command need their own connection.

use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use super::queue::{lock, RequestId, SharedQueue};
use crate::error::{Error, Result};
use crate::resp::Frame;

/// Lifecycle of a submitted request as seen by its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Written, no reply yet.
    Pending,
    /// A reply (or a server error reply) arrived.
    Resolved,
    /// The caller stopped waiting; any later reply is discarded.
    LocallyAbandoned,
    /// The connection failed before a reply arrived.
    ConnectionFailed,
}

/// Handle to one in-flight request.
///
/// Dropping the handle before it resolves withdraws the request.
pub struct Pending<T> {
    id: RequestId,
    rx: oneshot::Receiver<Result<T>>,
    queue: SharedQueue,
    state: RequestState,
}

/// Handle for a request resolving with a whole reply frame.
pub type ReplyHandle = Pending<Frame>;

/// Handle for a streamed range request resolving with its element count.
pub type StreamHandle = Pending<usize>;

impl<T> Pending<T> {
    pub(crate) fn new(id: RequestId, rx: oneshot::Receiver<Result<T>>, queue: SharedQueue) -> Self {
        Pending {
            id,
            rx,
            queue,
            state: RequestState::Pending,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Wait for the reply with no local deadline.
    pub async fn wait(&mut self) -> Result<T> {
        self.wait_with_deadline(None).await
    }

    /// Wait for the reply, giving up after `deadline` if one is set.
    ///
    /// On expiry the request is abandoned and `Error::LocalTimeout` is
    /// returned. The server is not told; it may still execute the command.
    /// The handle stays readable: `state()` reports how the wait ended.
    pub async fn wait_with_deadline(&mut self, deadline: Option<Duration>) -> Result<T> {
        if self.state != RequestState::Pending {
            return Err(Error::InvalidArgument(format!(
                "request {} already settled as {:?}",
                self.id, self.state
            )));
        }
        let outcome = match deadline {
            None => (&mut self.rx).await,
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.abandon();
                    // A reply routed before the abandon took effect still wins.
                    return match self.rx.try_recv() {
                        Ok(result) => self.settle(result),
                        Err(_) => {
                            debug!(
                                request = self.id.seq(),
                                deadline_ms = limit.as_millis() as u64,
                                "Local deadline elapsed"
                            );
                            Err(Error::LocalTimeout(limit))
                        }
                    };
                }
            },
        };
        match outcome {
            Ok(result) => self.settle(result),
            // The sender only disappears without a value if the connection
            // tasks are gone.
            Err(_) => {
                self.state = RequestState::ConnectionFailed;
                Err(Error::shut_down())
            }
        }
    }

    /// Withdraw the request. Returns false if it already settled.
    pub fn cancel(&mut self) -> bool {
        self.abandon()
    }

    fn settle(&mut self, result: Result<T>) -> Result<T> {
        self.state = match &result {
            Err(e) if e.is_fatal() => RequestState::ConnectionFailed,
            _ => RequestState::Resolved,
        };
        result
    }

    fn abandon(&mut self) -> bool {
        if self.state != RequestState::Pending {
            return false;
        }
        self.state = RequestState::LocallyAbandoned;
        // A streaming sink already taken by the read task sees this and
        // stops calling its consumer. A reply sent before now is kept.
        self.rx.close();
        lock(&self.queue).abandon(self.id)
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.abandon();
    }
}
