use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tag-sync")]
#[command(about = "Sync Eagle library tags into Jellyfin NFO sidecars", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./Config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write library tags to the sidecars and refresh the server
    Sync(SyncArgs),
    /// Validate configuration, library layout and server connection
    Check,
    /// Print configuration values (API key masked)
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Show what would change without writing or contacting the server
    #[arg(long)]
    pub dry_run: bool,

    /// Log filter, e.g. `debug` or `tag_sync=trace`
    #[arg(long)]
    pub log_level: Option<String>,
}
