//! CLI commands.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use dropforge_provider::Client;
use tracing::info;

use crate::config::Manifest;
use crate::error::ProvisionError;
use crate::provision::Pipeline;
use crate::state::TargetState;

/// dropforge - provision a single droplet and verify SSH access.
#[derive(Debug, Parser)]
#[command(name = "dropforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the target droplet and verify SSH access.
    Provision(TargetArgs),

    /// Destroy the target droplet.
    Destroy(TargetArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Path to the provisioning manifest (TOML).
    #[arg(long)]
    manifest: PathBuf,

    /// Provider API token. Overrides the manifest's credentials table.
    #[arg(long, env = "DROPFORGE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the per-target state directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Provision(args) => provision(args).await,
            Commands::Destroy(args) => destroy(args).await,
        }
    }
}

async fn provision(args: TargetArgs) -> Result<()> {
    let spec = Manifest::load(&args.manifest)?.resolve(args.token)?;
    let state = match args.state_dir {
        Some(dir) => TargetState::at(dir.join(&spec.name)),
        None => TargetState::for_target(&spec.name)?,
    };
    let client = Client::new(spec.token.clone())?;

    let resolved = Pipeline::new(&client, &spec, &state).run().await?;

    println!(
        "{} droplet {} (id {}, {}) is {}",
        "Provisioned:".green().bold(),
        spec.name,
        resolved.vm.id,
        resolved.vm.public_ip,
        "ready".green(),
    );
    Ok(())
}

async fn destroy(args: TargetArgs) -> Result<()> {
    let spec = Manifest::load(&args.manifest)?.resolve(args.token)?;
    let client = Client::new(spec.token.clone())?;

    let mut matches: Vec<_> = client
        .list_droplets()
        .await?
        .into_iter()
        .filter(|d| d.name == spec.name)
        .collect();

    if matches.len() > 1 {
        return Err(ProvisionError::AmbiguousTarget {
            name: spec.name.clone(),
        }
        .into());
    }

    let Some(droplet) = matches.pop() else {
        return Err(ProvisionError::NotFound(spec.name.clone()).into());
    };

    info!(droplet_id = droplet.id, name = %droplet.name, "destroying droplet");
    client.delete_droplet(droplet.id).await?;

    println!(
        "{} droplet {} (id {})",
        "Destroyed:".red().bold(),
        spec.name,
        droplet.id,
    );
    Ok(())
}
