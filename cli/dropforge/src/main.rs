//! dropforge - single-target droplet provisioning pipeline.
//!
//! Resolves (create-or-find) one droplet on the cloud provider, waits for it
//! to answer over SSH, proves authenticated shell access, and retires the
//! transient SSH key. Re-runs are idempotent: completed stages are skipped
//! based on provider state and the per-target cache.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;
mod provision;
mod resolver;
mod state;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
