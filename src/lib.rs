//! resp-lists: a pipelined RESP client for list commands
//!
//! - Commands are encoded as multi-bulk arrays and written without waiting
//! - Replies are matched to requests in FIFO order over one connection
//! - Range replies can be streamed element by element to a consumer
//! - Blocking pops take a server timeout plus an independent local deadline
//!
//! ```no_run
//! use resp_lists::{Client, ClientConfig};
//!
//! # async fn demo() -> resp_lists::Result<()> {
//! let client = Client::connect(&ClientConfig::default()).await?;
//! client.rpush("jobs", &["a", "b"]).await?;
//! let next = client.blpop(&["jobs"], 5).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod lists;
pub mod pipeline;
pub mod resp;

#[cfg(test)]
mod test_util;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, TomlConfig};
pub use connection::Connection;
pub use dispatch::{FromReply, InsertOutcome, KeyValue};
pub use error::{Error, Result};
pub use lists::InsertPosition;
pub use pipeline::{channel_consumer, RequestState, ValueConsumer};
pub use resp::{Command, Frame};
