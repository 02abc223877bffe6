//! Manifold - firehose fan-out daemon
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! manifold --config /etc/manifold/manifold.toml
//!
//! # Or configure entirely from flags / environment
//! MANIFOLD_UPSTREAM_HOST=firehose.example.com manifold \
//!     --persist-db ./manifold.db --persist-hours 168
//! ```

mod cmd;
mod metrics_http;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cmd::serve::ServeArgs::parse();
    cmd::serve::run(args).await
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
