//! stowaway: drives chunked transfers between local files and a configured
//! storage, one bounded tick at a time.

mod config;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stowaway_transfer::Direction;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "stowaway", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "STOWAWAY_CONFIG", default_value = "stowaway.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy local files to a storage.
    Upload(TransferArgs),
    /// Copy files from a storage to local paths.
    Download(TransferArgs),
    /// Abort provider upload sessions older than the configured age.
    Purge {
        /// Only purge this storage; all storages otherwise.
        #[arg(long)]
        storage: Option<String>,
    },
    /// Show the saved checkpoint of a transfer.
    Status {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, clap::Args)]
struct TransferArgs {
    /// Storage name; the configured default otherwise.
    #[arg(long)]
    storage: Option<String>,

    /// Transfer id used for the checkpoint file.
    #[arg(long)]
    id: String,

    /// `FROM=TO` pairs, copied in order.
    #[arg(required = true, value_parser = run::parse_item)]
    items: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting stowaway");

    let config = CliConfig::load(&cli.config)?;

    match cli.command {
        Command::Upload(args) => {
            run::transfer(&config, Direction::Upload, args.storage, args.id, args.items).await
        }
        Command::Download(args) => {
            run::transfer(&config, Direction::Download, args.storage, args.id, args.items).await
        }
        Command::Purge { storage } => run::purge(&config, storage.as_deref()).await,
        Command::Status { id } => run::status(&config, &id).await,
    }
}
