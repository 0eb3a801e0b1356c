//! One pipelined connection to a RESP server.
//!
//! A connection runs two tasks over one byte stream:
//! - a write task that drains encoded commands and writes them in order,
//!   coalescing whatever is already queued into a single write
//! - a read task that owns the reply buffer, decodes replies, and routes
//!   each one to the request at the head of the pipeline queue
//!
//! Callers submit without waiting: `send` registers the request and hands
//! its bytes to the write task under the queue lock, so the order of
//! requests in the queue is the order of commands on the wire.

use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pipeline::queue::{lock, DecodeMode, PipelineQueue, RequestId, SharedQueue};
use crate::pipeline::sink::{Sink, StreamSink, ValueConsumer};
use crate::pipeline::{Pending, ReplyHandle, StreamHandle};
use crate::resp::{Command, Decoder, ProtocolError, StreamItem};

/// Upper bound on bytes coalesced into one write.
const MAX_WRITE_BATCH: usize = 64 * 1024;

/// Handle to a connection. Clones share the same connection and pipeline.
///
/// The connection shuts down when the last handle is dropped or `close`
/// is called. Requests still pending at that point fail.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    queue: SharedQueue,
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Asks both tasks to stop.
    shutdown: Arc<watch::Sender<bool>>,
    /// Set by the read task once every pending request has been failed.
    torn_down: watch::Receiver<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl Connection {
    /// Open a TCP connection as configured.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let connecting = TcpStream::connect(config.address.as_str());
        let stream = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(Error::from(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", config.address),
                )))
            }
        };
        configure_socket(&stream, config)?;
        debug!(address = %config.address, "Connected");
        Ok(Connection::new(stream, config))
    }

    /// Run the pipeline over an already established byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T>(stream: T, config: &ClientConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let queue: SharedQueue = Arc::new(Mutex::new(PipelineQueue::new()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let (torn_down_tx, torn_down) = watch::channel(false);
        let decoder = Decoder::new(config.read_buffer_size, config.max_bulk_len);

        tokio::spawn(read_loop(
            reader,
            decoder,
            Arc::clone(&queue),
            Arc::clone(&shutdown),
            shutdown_rx.clone(),
            torn_down_tx,
        ));
        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            Arc::clone(&queue),
            Arc::clone(&shutdown),
            shutdown_rx,
        ));

        Connection {
            inner: Arc::new(Inner {
                queue,
                outbound,
                shutdown,
                torn_down,
            }),
        }
    }

    /// Submit a command whose reply resolves as one frame.
    pub fn send(&self, command: Command) -> Result<ReplyHandle> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(&command, Sink::Once(tx))?;
        Ok(Pending::new(id, rx, Arc::clone(&self.inner.queue)))
    }

    /// Submit a command whose array reply is streamed to `consumer`.
    pub fn send_streaming<C: ValueConsumer>(
        &self,
        command: Command,
        consumer: C,
    ) -> Result<StreamHandle> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(&command, Sink::stream(Box::new(consumer), tx))?;
        Ok(Pending::new(id, rx, Arc::clone(&self.inner.queue)))
    }

    /// Requests written but not yet answered, abandoned ones included.
    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// The error the connection closed with, if it has closed.
    pub fn close_reason(&self) -> Option<Error> {
        lock(&self.inner.queue).closed_error().cloned()
    }

    /// Shut the connection down. Pending requests fail.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Wait until the connection has closed and every pending request
    /// has been failed.
    pub async fn closed(&self) {
        let mut rx = self.inner.torn_down.clone();
        // A dropped sender means the read task is gone, which is also done.
        let _ = rx.wait_for(|done| *done).await;
    }

    fn submit(&self, command: &Command, sink: Sink) -> Result<RequestId> {
        let bytes = command.encode().freeze();
        let mut queue = lock(&self.inner.queue);
        if let Some(err) = queue.closed_error() {
            return Err(err.clone());
        }
        if self.inner.outbound.send(bytes).is_err() {
            return Err(Error::shut_down());
        }
        let id = queue.enqueue(sink)?;
        trace!(
            request = id.seq(),
            command = command.name(),
            blocking = command.is_blocking(),
            pending = queue.len(),
            "Command queued"
        );
        Ok(id)
    }
}

fn configure_socket(stream: &TcpStream, config: &ClientConfig) -> io::Result<()> {
    stream.set_nodelay(config.nodelay)?;
    if let Some(idle) = config.keepalive {
        let keepalive = socket2::TcpKeepalive::new().with_time(idle);
        socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Read task: decode replies and route them until the stream ends.
async fn read_loop<R>(
    mut reader: R,
    mut decoder: Decoder,
    queue: SharedQueue,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
    torn_down: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut active: Option<StreamSink> = None;

    let err = loop {
        if let Err(e) = drain_replies(&mut decoder, &queue, &mut active) {
            warn!(error = %e, "Protocol violation, closing connection");
            break Error::Protocol(e);
        }

        tokio::select! {
            read = reader.read_buf(decoder.buffer_mut()) => match read {
                Ok(0) => {
                    if !decoder.is_idle() {
                        warn!(buffered = decoder.buffered(), "Connection closed mid-reply");
                    } else {
                        debug!("Connection closed by server");
                    }
                    break Error::closed_by_peer();
                }
                Ok(n) => trace!(bytes = n, "Read reply bytes"),
                Err(e) => {
                    warn!(error = %e, "Read failed");
                    break Error::from(e);
                }
            },
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                break lock(&queue)
                    .closed_error()
                    .cloned()
                    .unwrap_or_else(Error::shut_down);
            }
        }
    };

    // The stream in progress belongs to the head request, so it fails first.
    if let Some(stream) = active.take() {
        Sink::Stream(stream).fail(err.clone());
    }
    let failed = lock(&queue).on_connection_closed(&err);
    if failed > 0 {
        debug!(failed, error = %err, "Failed pending requests");
    }
    shutdown.send_replace(true);
    torn_down.send_replace(true);
}

/// Route every reply (or streamed element) the buffer currently holds.
fn drain_replies(
    decoder: &mut Decoder,
    queue: &SharedQueue,
    active: &mut Option<StreamSink>,
) -> std::result::Result<(), ProtocolError> {
    loop {
        let mode = if decoder.is_streaming() {
            DecodeMode::Streaming
        } else if decoder.buffered() == 0 {
            return Ok(());
        } else {
            lock(queue)
                .head_mode()
                .ok_or(ProtocolError::UnsolicitedReply)?
        };

        match mode {
            DecodeMode::Whole => match decoder.decode()? {
                Some(frame) => {
                    trace!(kind = frame.kind(), "Reply decoded");
                    lock(queue).on_frame_decoded(frame)?;
                }
                None => return Ok(()),
            },
            DecodeMode::Streaming => match decoder.decode_streaming()? {
                Some(StreamItem::Element(frame)) => {
                    if active.is_none() {
                        *active = lock(queue).take_head_sink()?.and_then(Sink::into_stream);
                    }
                    // Runs the caller's consumer, outside the queue lock.
                    if let Some(stream) = active.as_mut() {
                        stream.element(frame);
                    }
                }
                Some(StreamItem::Done(count)) => {
                    let untaken = lock(queue).on_stream_done()?;
                    let sink = active.take().or_else(|| untaken.and_then(Sink::into_stream));
                    let delivered = sink.map(StreamSink::finish).unwrap_or(false);
                    trace!(count, delivered, "Streamed reply complete");
                }
                Some(StreamItem::Whole(frame)) => {
                    trace!(kind = frame.kind(), "Streamed request got a whole reply");
                    lock(queue).on_frame_decoded(frame)?;
                }
                None => return Ok(()),
            },
        }
    }
}

/// Write task: drain queued commands into the stream in order.
async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    queue: SharedQueue,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut batch = BytesMut::new();

    loop {
        let first = tokio::select! {
            next = outbound.recv() => match next {
                Some(bytes) => bytes,
                None => break,
            },
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
        };

        batch.extend_from_slice(&first);
        let mut commands = 1;
        while batch.len() < MAX_WRITE_BATCH {
            match outbound.try_recv() {
                Ok(more) => {
                    batch.extend_from_slice(&more);
                    commands += 1;
                }
                Err(_) => break,
            }
        }
        trace!(commands, bytes = batch.len(), "Writing commands");

        let written = async {
            writer.write_all(&batch).await?;
            writer.flush().await
        };
        let result = tokio::select! {
            result = written => result,
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
        };
        if let Err(e) = result {
            warn!(error = %e, "Write failed, closing connection");
            lock(&queue).mark_closed(&Error::from(e));
            shutdown.send_replace(true);
            return;
        }
        batch.clear();
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RequestState;
    use crate::resp::Frame;
    use crate::test_util::{connected, expect_bytes};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_lpush_wire_bytes_and_reply() {
        let mock = tokio_test::io::Builder::new()
            .write(b"*4\r\n$5\r\nLPUSH\r\n$6\r\nmylist\r\n$1\r\na\r\n$1\r\nb\r\n")
            .read(b":2\r\n")
            .build();
        let conn = Connection::new(mock, &ClientConfig::default());

        let mut handle = conn
            .send(Command::new("LPUSH").arg("mylist").arg("a").arg("b"))
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), Frame::integer(2));
    }

    #[tokio::test]
    async fn test_pipelined_replies_keep_submission_order() {
        let (conn, mut server) = connected();

        let commands = [
            Command::new("LLEN").arg("a"),
            Command::new("LRANGE").arg("a").arg_int(0).arg_int(-1),
            Command::new("LPOP").arg("missing"),
            Command::new("BLPOP").arg("a").arg("b").arg_int(1),
            Command::new("RPUSH").arg("a").arg("x"),
        ];
        let mut expected_wire = BytesMut::new();
        let mut handles = Vec::new();
        for cmd in commands {
            cmd.encode_into(&mut expected_wire);
            handles.push(conn.send(cmd).unwrap());
        }
        assert_eq!(conn.pending(), 5);
        expect_bytes(&mut server, &expected_wire).await;

        let replies = vec![
            Frame::integer(3),
            Frame::array(vec![
                Frame::bulk(Bytes::from_static(b"x")),
                Frame::bulk(Bytes::from_static(b"y")),
                Frame::bulk(Bytes::from_static(b"z")),
            ]),
            Frame::null(),
            Frame::array(vec![
                Frame::bulk(Bytes::from_static(b"a")),
                Frame::bulk(Bytes::from_static(b"x")),
            ]),
            Frame::integer(3),
        ];
        let mut wire = BytesMut::new();
        for reply in &replies {
            reply.encode_into(&mut wire);
        }
        // Dribble the replies out in small, misaligned pieces.
        for piece in wire.chunks(3) {
            server.write_all(piece).await.unwrap();
            tokio::task::yield_now().await;
        }

        // Await in reverse; each handle still gets its own reply.
        for (mut handle, expected) in handles.into_iter().zip(replies).rev() {
            assert_eq!(handle.wait().await.unwrap(), expected);
        }
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_abandoned_reply_is_discarded() {
        let (conn, mut server) = connected();

        let blpop = Command::new("BLPOP").arg("empty").arg_int(0);
        let llen = Command::new("LLEN").arg("empty");
        let mut wire = blpop.encode();
        llen.encode_into(&mut wire);

        let mut handle = conn.send(blpop).unwrap();
        let err = handle
            .wait_with_deadline(Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(handle.state(), RequestState::LocallyAbandoned);
        // The server still owes the BLPOP reply.
        assert_eq!(conn.pending(), 1);

        let mut next = conn.send(llen).unwrap();
        expect_bytes(&mut server, &wire).await;
        server
            .write_all(b"*2\r\n$5\r\nempty\r\n$4\r\nlate\r\n:0\r\n")
            .await
            .unwrap();

        assert_eq!(next.wait().await.unwrap(), Frame::integer(0));
        assert_eq!(next.state(), RequestState::Resolved);
        assert_eq!(handle.state(), RequestState::LocallyAbandoned);
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn test_streaming_delivers_elements_in_order() {
        let (conn, mut server) = connected();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut stream = conn
            .send_streaming(
                Command::new("LRANGE").arg("l").arg_int(0).arg_int(-1),
                crate::pipeline::channel_consumer(tx),
            )
            .unwrap();
        let mut after = conn.send(Command::new("LLEN").arg("l")).unwrap();

        server
            .write_all(b"*3\r\n$3\r\none\r\n$3\r\ntw")
            .await
            .unwrap();
        // The first element is delivered before the array is complete.
        assert_eq!(rx.recv().await, Some(Some(Bytes::from_static(b"one"))));

        server.write_all(b"o\r\n$5\r\nthree\r\n:3\r\n").await.unwrap();
        assert_eq!(stream.wait().await.unwrap(), 3);
        assert_eq!(rx.recv().await, Some(Some(Bytes::from_static(b"two"))));
        assert_eq!(rx.recv().await, Some(Some(Bytes::from_static(b"three"))));
        assert_eq!(after.wait().await.unwrap(), Frame::integer(3));
    }

    #[tokio::test]
    async fn test_abandoned_stream_is_drained() {
        let (conn, mut server) = connected();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut stream = conn
            .send_streaming(
                Command::new("LRANGE").arg("l").arg_int(0).arg_int(-1),
                crate::pipeline::channel_consumer(tx),
            )
            .unwrap();
        let mut after = conn.send(Command::new("LLEN").arg("l")).unwrap();
        assert!(stream.cancel());

        server
            .write_all(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n:2\r\n")
            .await
            .unwrap();
        assert_eq!(after.wait().await.unwrap(), Frame::integer(2));
        assert_eq!(rx.recv().await, None);
        assert_eq!(stream.state(), RequestState::LocallyAbandoned);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_consumer() {
        let (conn, mut server) = connected();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut stream = conn
            .send_streaming(
                Command::new("LRANGE").arg("l").arg_int(0).arg_int(-1),
                crate::pipeline::channel_consumer(tx),
            )
            .unwrap();
        let mut after = conn.send(Command::new("LLEN").arg("l")).unwrap();

        server.write_all(b"*3\r\n$1\r\na\r\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(Some(Bytes::from_static(b"a"))));

        assert!(stream.cancel());
        assert_eq!(stream.state(), RequestState::LocallyAbandoned);

        server
            .write_all(b"$1\r\nb\r\n$1\r\nc\r\n:3\r\n")
            .await
            .unwrap();
        assert_eq!(after.wait().await.unwrap(), Frame::integer(3));
        // The rest of the array was drained without reaching the consumer.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection_usable() {
        let (conn, mut server) = connected();
        let mut first = conn.send(Command::new("LPUSH").arg("str").arg("v")).unwrap();
        let mut second = conn.send(Command::new("LLEN").arg("l")).unwrap();

        server
            .write_all(b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n:4\r\n")
            .await
            .unwrap();

        match first.wait().await {
            Err(Error::Server(msg)) => assert!(msg.starts_with("WRONGTYPE")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(second.wait().await.unwrap(), Frame::integer(4));
        assert!(conn.close_reason().is_none());
    }

    #[tokio::test]
    async fn test_protocol_violation_fails_everything() {
        let (conn, mut server) = connected();
        let mut first = conn.send(Command::new("LLEN").arg("a")).unwrap();
        let mut second = conn.send(Command::new("LLEN").arg("b")).unwrap();

        server.write_all(b"!garbage\r\n").await.unwrap();

        assert!(matches!(
            first.wait().await,
            Err(Error::Protocol(ProtocolError::UnknownTag(b'!')))
        ));
        assert!(matches!(second.wait().await, Err(Error::Protocol(_))));

        conn.closed().await;
        assert!(matches!(
            conn.send(Command::new("LLEN").arg("c")),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unsolicited_reply_closes_connection() {
        let (conn, mut server) = connected();
        server.write_all(b":1\r\n").await.unwrap();
        conn.closed().await;
        assert!(matches!(
            conn.close_reason(),
            Some(Error::Protocol(ProtocolError::UnsolicitedReply))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_in_order() {
        let (conn, mut server) = connected();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut stream = conn
            .send_streaming(
                Command::new("LRANGE").arg("l").arg_int(0).arg_int(-1),
                crate::pipeline::channel_consumer(tx),
            )
            .unwrap();
        let mut next = conn.send(Command::new("LLEN").arg("l")).unwrap();

        // Half an array, then the server goes away.
        server.write_all(b"*3\r\n$1\r\na\r\n").await.unwrap();
        drop(server);

        let err = stream.wait().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(next.wait().await, Err(Error::Connection(_))));
        assert!(conn.send(Command::new("LLEN").arg("l")).is_err());
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (conn, _server) = connected();
        let mut handle = conn.send(Command::new("BLPOP").arg("q").arg_int(0)).unwrap();
        conn.close();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_closed_returns_after_teardown() {
        let (conn, _server) = connected();
        let mut handles: Vec<_> = (0..3)
            .map(|i| conn.send(Command::new("LLEN").arg(format!("k{i}"))).unwrap())
            .collect();
        conn.close();
        conn.closed().await;

        // Everything is already failed by the time `closed` returns.
        assert_eq!(conn.pending(), 0);
        assert!(matches!(conn.close_reason(), Some(Error::Connection(_))));
        for handle in &mut handles {
            assert!(matches!(handle.wait().await, Err(Error::Connection(_))));
            assert_eq!(handle.state(), RequestState::ConnectionFailed);
        }
        // Waiting again returns at once.
        conn.closed().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_get_their_own_replies() {
        const TASKS: i64 = 200;
        let (conn, mut server) = connected();

        // Answers `LLEN k<n>` with `:n`, in arrival order.
        let serve = tokio::spawn(async move {
            let mut decoder = Decoder::new(4096, usize::MAX);
            let mut answered = 0;
            while answered < TASKS {
                let n = server.read_buf(decoder.buffer_mut()).await.unwrap();
                assert!(n > 0, "client hung up with {answered} answered");
                let mut replies = BytesMut::new();
                while let Some(frame) = decoder.decode().unwrap() {
                    let Frame::Array(Some(args)) = frame else {
                        panic!("command was not an array");
                    };
                    let Frame::Bulk(Some(key)) = &args[1] else {
                        panic!("no key in {args:?}");
                    };
                    let n: i64 = std::str::from_utf8(&key[1..]).unwrap().parse().unwrap();
                    Frame::integer(n).encode_into(&mut replies);
                    answered += 1;
                }
                server.write_all(&replies).await.unwrap();
            }
            server
        });

        let tasks: Vec<_> = (0..TASKS)
            .map(|i| {
                let conn = conn.clone();
                tokio::spawn(async move {
                    let mut handle = conn
                        .send(Command::new("LLEN").arg(format!("k{i}")))
                        .unwrap();
                    (i, handle.wait().await.unwrap())
                })
            })
            .collect();
        for task in tasks {
            let (i, reply) = task.await.unwrap();
            assert_eq!(reply, Frame::integer(i));
        }

        let _server = serve.await.unwrap();
        assert_eq!(conn.pending(), 0);
        assert!(conn.close_reason().is_none());
    }
}
