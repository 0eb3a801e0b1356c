//! Command-line front end.
//!
//! CLI arguments take precedence over config file values.

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use resp_lists::{Client, ClientConfig, ConfigError, InsertOutcome, InsertPosition, TomlConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "resp-lists")]
#[command(version = "0.1.0")]
#[command(about = "Run list commands against a RESP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server address (e.g., 127.0.0.1:6379)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Give up waiting for a reply after this many milliseconds
    #[arg(short, long)]
    pub deadline_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub op: ListOp,
}

#[derive(Subcommand, Debug)]
pub enum ListOp {
    /// Pop from the head of the first non-empty list, waiting if needed
    Blpop {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Server-side timeout in seconds (0 = forever)
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
    /// Pop from the tail of the first non-empty list, waiting if needed
    Brpop {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
    /// Move the tail of one list to the head of another, waiting if needed
    Brpoplpush {
        source: String,
        destination: String,
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
    Lindex {
        key: String,
        #[arg(allow_hyphen_values = true)]
        index: i64,
    },
    Linsert {
        key: String,
        #[arg(value_enum)]
        position: Side,
        pivot: String,
        value: String,
    },
    Llen {
        key: String,
    },
    Lpop {
        key: String,
    },
    Lpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Lpushx {
        key: String,
        value: String,
    },
    Lrange {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        stop: i64,
        /// Print elements as they are decoded
        #[arg(long)]
        stream: bool,
    },
    Lrem {
        key: String,
        #[arg(allow_hyphen_values = true)]
        count: i64,
        value: String,
    },
    Lset {
        key: String,
        #[arg(allow_hyphen_values = true)]
        index: i64,
        value: String,
    },
    Ltrim {
        key: String,
        #[arg(allow_hyphen_values = true)]
        start: i64,
        #[arg(allow_hyphen_values = true)]
        stop: i64,
    },
    Rpop {
        key: String,
    },
    Rpoplpush {
        source: String,
        destination: String,
    },
    Rpush {
        key: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Rpushx {
        key: String,
        value: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Before,
    After,
}

impl From<Side> for InsertPosition {
    fn from(side: Side) -> Self {
        match side {
            Side::Before => InsertPosition::Before,
            Side::After => InsertPosition::After,
        }
    }
}

/// Final resolved settings
#[derive(Debug)]
pub struct Settings {
    pub client: ClientConfig,
    pub log_level: String,
}

impl Settings {
    /// Load the TOML file named on the command line, if any, and merge.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match &cli.config {
            Some(path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };
        Ok(Settings::merge(cli, toml_config))
    }

    fn merge(cli: &CliArgs, toml_config: TomlConfig) -> Self {
        let mut client = toml_config.client_config();
        if let Some(address) = &cli.address {
            client.address = address.clone();
        }
        if let Some(ms) = cli.deadline_ms {
            client.local_deadline = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Settings {
            client,
            log_level: if cli.log_level != "info" {
                cli.log_level.clone()
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Run one list operation and print its result.
pub async fn run(client: &Client, op: ListOp) -> resp_lists::Result<()> {
    match op {
        ListOp::Blpop { keys, timeout } => print_popped(client.blpop(keys.as_slice(), timeout).await?),
        ListOp::Brpop { keys, timeout } => print_popped(client.brpop(keys.as_slice(), timeout).await?),
        ListOp::Brpoplpush {
            source,
            destination,
            timeout,
        } => print_value(client.brpoplpush(source, destination, timeout).await?),
        ListOp::Lindex { key, index } => print_value(client.lindex(key, index).await?),
        ListOp::Linsert {
            key,
            position,
            pivot,
            value,
        } => match client.linsert(key, position.into(), pivot, value).await? {
            InsertOutcome::Length(n) => println!("(integer) {n}"),
            InsertOutcome::PivotNotFound => println!("(pivot not found)"),
            InsertOutcome::NoSuchKey => println!("(no such key)"),
        },
        ListOp::Llen { key } => print_integer(client.llen(key).await?),
        ListOp::Lpop { key } => print_value(client.lpop(key).await?),
        ListOp::Lpush { key, values } => print_integer(client.lpush(key, values.as_slice()).await?),
        ListOp::Lpushx { key, value } => print_integer(client.lpushx(key, value).await?),
        ListOp::Lrange {
            key,
            start,
            stop,
            stream: true,
        } => {
            let mut index = 0usize;
            let printer = move |value: Option<Bytes>| {
                index += 1;
                println!("{index}) {}", display(value.as_ref()));
            };
            let count = client.lrange_streaming(printer, key, start, stop).await?;
            if count == 0 {
                println!("(empty list)");
            }
        }
        ListOp::Lrange {
            key, start, stop, ..
        } => {
            let values = client.lrange(key, start, stop).await?;
            if values.is_empty() {
                println!("(empty list)");
            }
            for (i, value) in values.iter().enumerate() {
                println!("{}) {}", i + 1, display(Some(value)));
            }
        }
        ListOp::Lrem { key, count, value } => print_integer(client.lrem(key, count, value).await?),
        ListOp::Lset { key, index, value } => println!("{}", client.lset(key, index, value).await?),
        ListOp::Ltrim { key, start, stop } => println!("{}", client.ltrim(key, start, stop).await?),
        ListOp::Rpop { key } => print_value(client.rpop(key).await?),
        ListOp::Rpoplpush {
            source,
            destination,
        } => print_value(client.rpoplpush(source, destination).await?),
        ListOp::Rpush { key, values } => print_integer(client.rpush(key, values.as_slice()).await?),
        ListOp::Rpushx { key, value } => print_integer(client.rpushx(key, value).await?),
    }
    Ok(())
}

fn display(value: Option<&Bytes>) -> String {
    match value {
        Some(bytes) => format!("\"{}\"", String::from_utf8_lossy(bytes).escape_debug()),
        None => "(nil)".to_string(),
    }
}

fn print_value(value: Option<Bytes>) {
    println!("{}", display(value.as_ref()));
}

fn print_integer(n: i64) {
    println!("(integer) {n}");
}

fn print_popped(popped: Option<resp_lists::KeyValue>) {
    match popped {
        Some(kv) => {
            println!("1) {}", display(Some(&kv.key)));
            println!("2) {}", display(Some(&kv.value)));
        }
        None => println!("(nil)"),
    }
}
