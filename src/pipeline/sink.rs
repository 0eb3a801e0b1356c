//! Result sinks attached to pending requests.
//!
//! A sink either resolves once with the full reply frame, or receives the
//! elements of an array reply one at a time and resolves with the count.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::resp::Frame;

/// Receives the elements of a streamed range reply, in server order.
///
/// Called on the connection's read task as each element finishes decoding,
/// never concurrently for one reply. A slow consumer holds up decoding of
/// every reply behind it on the same connection.
pub trait ValueConsumer: Send + 'static {
    fn on_value(&mut self, value: Option<Bytes>);
}

impl<F> ValueConsumer for F
where
    F: FnMut(Option<Bytes>) + Send + 'static,
{
    fn on_value(&mut self, value: Option<Bytes>) {
        self(value)
    }
}

/// Consumer that forwards each element into an unbounded channel.
///
/// Elements sent after the receiver is dropped are discarded.
pub fn channel_consumer(tx: mpsc::UnboundedSender<Option<Bytes>>) -> impl ValueConsumer {
    move |value: Option<Bytes>| {
        let _ = tx.send(value);
    }
}

/// Where a reply goes once decoded.
pub(crate) enum Sink {
    /// Resolve once with the whole frame.
    Once(oneshot::Sender<Result<Frame>>),
    /// Feed array elements to a consumer, then resolve with the count.
    Stream(StreamSink),
}

impl Sink {
    pub(crate) fn stream(
        consumer: Box<dyn ValueConsumer>,
        done: oneshot::Sender<Result<usize>>,
    ) -> Self {
        Sink::Stream(StreamSink {
            consumer,
            count: 0,
            failure: None,
            done,
        })
    }

    /// Deliver a whole reply. Returns false if the waiting side is gone.
    pub(crate) fn deliver(self, frame: Frame) -> bool {
        match self {
            Sink::Once(tx) => {
                let result = match frame {
                    Frame::Error(msg) => Err(Error::Server(msg)),
                    other => Ok(other),
                };
                tx.send(result).is_ok()
            }
            Sink::Stream(stream) => stream.whole(frame),
        }
    }

    /// Fail the request without a reply.
    pub(crate) fn fail(self, err: Error) {
        match self {
            Sink::Once(tx) => {
                let _ = tx.send(Err(err));
            }
            Sink::Stream(stream) => {
                let _ = stream.done.send(Err(err));
            }
        }
    }

    /// Split out the streaming half, if this is a streaming sink.
    pub(crate) fn into_stream(self) -> Option<StreamSink> {
        match self {
            Sink::Stream(stream) => Some(stream),
            Sink::Once(_) => None,
        }
    }

    /// Whether the waiting side has gone away.
    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Sink::Once(tx) => tx.is_closed(),
            Sink::Stream(stream) => stream.done.is_closed(),
        }
    }
}

/// Streaming half of a range request.
pub(crate) struct StreamSink {
    consumer: Box<dyn ValueConsumer>,
    count: usize,
    failure: Option<Error>,
    done: oneshot::Sender<Result<usize>>,
}

impl StreamSink {
    /// Hand one decoded element to the consumer.
    ///
    /// After a malformed element the consumer is no longer called; the rest
    /// of the array is still drained off the wire.
    pub(crate) fn element(&mut self, frame: Frame) {
        if self.failure.is_some() || self.done.is_closed() {
            return;
        }
        match frame {
            Frame::Bulk(value) => {
                self.consumer.on_value(value);
                self.count += 1;
            }
            other => self.failure = Some(Error::shape("bulk string element", &other)),
        }
    }

    /// The array ended. Resolves with the number of elements consumed.
    pub(crate) fn finish(self) -> bool {
        let result = match self.failure {
            Some(err) => Err(err),
            None => Ok(self.count),
        };
        self.done.send(result).is_ok()
    }

    /// The reply was not a sized array.
    fn whole(self, frame: Frame) -> bool {
        let result = match frame {
            Frame::Error(msg) => Err(Error::Server(msg)),
            // A nil array carries no elements.
            Frame::Array(None) => Ok(0),
            other => Err(Error::shape("array", &other)),
        };
        self.done.send(result).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting() -> (Arc<Mutex<Vec<Option<Bytes>>>>, Box<dyn ValueConsumer>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let consumer: Box<dyn ValueConsumer> =
            Box::new(move |v: Option<Bytes>| sink_seen.lock().unwrap().push(v));
        (seen, consumer)
    }

    #[test]
    fn test_once_maps_error_frames() {
        let (tx, mut rx) = oneshot::channel();
        assert!(Sink::Once(tx).deliver(Frame::error("WRONGTYPE bad")));
        match rx.try_recv().unwrap() {
            Err(Error::Server(msg)) => assert_eq!(msg, "WRONGTYPE bad"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_once_reports_dropped_receiver() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let sink = Sink::Once(tx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(Frame::integer(1)));
    }

    #[test]
    fn test_stream_counts_elements() {
        let (seen, consumer) = collecting();
        let (tx, mut rx) = oneshot::channel();
        let mut stream = Sink::stream(consumer, tx).into_stream().unwrap();

        stream.element(Frame::bulk(Bytes::from_static(b"a")));
        stream.element(Frame::null());
        stream.element(Frame::bulk(Bytes::from_static(b"c")));
        assert!(stream.finish());

        assert_eq!(rx.try_recv().unwrap().unwrap(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(Bytes::from_static(b"a")), None, Some(Bytes::from_static(b"c"))]
        );
    }

    #[test]
    fn test_stream_stops_on_shape_mismatch() {
        let (seen, consumer) = collecting();
        let (tx, mut rx) = oneshot::channel();
        let mut stream = Sink::stream(consumer, tx).into_stream().unwrap();

        stream.element(Frame::bulk(Bytes::from_static(b"a")));
        stream.element(Frame::integer(5));
        stream.element(Frame::bulk(Bytes::from_static(b"c")));
        stream.finish();

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::ShapeMismatch { found: "integer", .. })
        ));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stream_whole_replies() {
        let (_, consumer) = collecting();
        let (tx, mut rx) = oneshot::channel();
        Sink::stream(consumer, tx).deliver(Frame::error("ERR range"));
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Server(_))));

        let (_, consumer) = collecting();
        let (tx, mut rx) = oneshot::channel();
        Sink::stream(consumer, tx).deliver(Frame::null_array());
        assert_eq!(rx.try_recv().unwrap().unwrap(), 0);

        let (_, consumer) = collecting();
        let (tx, mut rx) = oneshot::channel();
        Sink::stream(consumer, tx).deliver(Frame::integer(1));
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ShapeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_channel_consumer_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut consumer = channel_consumer(tx);
        consumer.on_value(Some(Bytes::from_static(b"x")));
        consumer.on_value(None);
        assert_eq!(rx.recv().await, Some(Some(Bytes::from_static(b"x"))));
        assert_eq!(rx.recv().await, Some(None));
    }
}
