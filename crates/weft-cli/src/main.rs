//! Weft CLI - inspect and maintain shared weft stores

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use weft::{ConsumerIdentity, StoreId};

mod commands;

#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Shared container directory holding the store files
    #[arg(short, long, default_value = "./data")]
    dir: PathBuf,

    /// Checkpoint directory (default: <dir>/checkpoints)
    #[arg(long)]
    checkpoints: Option<PathBuf>,

    /// Store to operate on (main, media)
    #[arg(short, long, default_value = "main")]
    store: StoreId,

    /// JSON configuration file; its store path overrides --dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log bounds, checkpoints and per-consumer lag
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge pending log entries as one consumer
    Merge {
        /// Consumer to merge as (primary, share-extension, notification-extension)
        #[arg(long = "as", default_value = "primary")]
        consumer: ConsumerIdentity,
    },

    /// Delete log entries every consumer has merged
    Prune {
        /// Show the prune floor without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List every consumer's checkpoint
    Checkpoints,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let target = commands::Target::resolve(cli.dir, cli.checkpoints, cli.store, cli.config)?;

    // Execute command
    match cli.command {
        Commands::Status { json } => commands::status::execute(&target, json)?,
        Commands::Merge { consumer } => commands::merge::execute(&target, consumer)?,
        Commands::Prune { dry_run } => commands::prune::execute(&target, dry_run)?,
        Commands::Checkpoints => commands::checkpoints::execute(&target)?,
    }

    Ok(())
}
