//! resp-lists: run list commands against a RESP server
//!
//! Features:
//! - One subcommand per list command
//! - Blocking pops with a server timeout and an optional local deadline
//! - Streamed range output, printed as elements are decoded
//! - Configuration via CLI arguments or TOML file

mod cli;

use clap::Parser;
use cli::{CliArgs, Settings};
use resp_lists::Client;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let settings = Settings::load(&args)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        address = %settings.client.address,
        local_deadline_ms = settings.client.local_deadline.map(|d| d.as_millis() as u64),
        "Connecting"
    );

    let client = Client::connect(&settings.client).await?;
    cli::run(&client, args.op).await?;
    Ok(())
}
