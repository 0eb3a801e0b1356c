//! Typed command execution over one connection.

use std::time::Duration;
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatch::FromReply;
use crate::error::Result;
use crate::pipeline::ValueConsumer;
use crate::resp::Command;

/// Issues commands and converts their replies.
///
/// Cloning is cheap; clones pipeline over the same connection. A clone made
/// with `with_local_deadline` waits differently but shares the connection.
#[derive(Clone)]
pub struct Client {
    connection: Connection,
    local_deadline: Option<Duration>,
}

impl Client {
    /// Connect as configured.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let connection = Connection::connect(config).await?;
        Ok(Client::new(connection, config.local_deadline))
    }

    pub fn new(connection: Connection, local_deadline: Option<Duration>) -> Self {
        Client {
            connection,
            local_deadline,
        }
    }

    /// A client sharing this connection with a different local deadline.
    ///
    /// The local deadline bounds how long each call waits. It is separate
    /// from any server-side timeout a blocking command carries.
    pub fn with_local_deadline(&self, deadline: Option<Duration>) -> Client {
        Client {
            connection: self.connection.clone(),
            local_deadline: deadline,
        }
    }

    pub fn local_deadline(&self) -> Option<Duration> {
        self.local_deadline
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a command and convert its reply to `R`.
    pub async fn execute<R: FromReply>(&self, command: Command) -> Result<R> {
        let name = command.name().to_string();
        let mut handle = self.connection.send(command)?;
        let request = handle.id();
        let frame = handle.wait_with_deadline(self.local_deadline).await?;
        debug!(%request, command = %name, kind = frame.kind(), "Reply");
        R::from_reply(frame)
    }

    /// Send a command whose array reply is handed to `consumer` element by
    /// element. Returns the number of elements delivered.
    pub async fn execute_streaming<C: ValueConsumer>(
        &self,
        command: Command,
        consumer: C,
    ) -> Result<usize> {
        let mut handle = self.connection.send_streaming(command, consumer)?;
        handle.wait_with_deadline(self.local_deadline).await
    }
}
