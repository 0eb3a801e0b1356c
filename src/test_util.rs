//! Scripted server side for connection tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::resp::{Command, Frame};

/// A connection wired to an in-memory stream the test plays server on.
pub(crate) fn connected() -> (Connection, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (Connection::new(client, &ClientConfig::default()), server)
}

/// Read exactly `expected.len()` bytes and compare.
pub(crate) async fn expect_bytes(server: &mut DuplexStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

/// Expect `command` on the wire and answer it with `reply`.
pub(crate) async fn answer(server: &mut DuplexStream, command: Command, reply: Frame) {
    expect_bytes(server, &command.encode()).await;
    server.write_all(&reply.encode()).await.unwrap();
}
