//! Command-line surface for the daemon and sync entry points.
//!
//! The human-facing issue CLI is intentionally thin; the daemon's RPC
//! protocol is the primary interface for tooling.

pub mod commands;

use clap::{Parser, Subcommand};

/// `bd` - beads workspace daemon and sync tool.
#[derive(Debug, Parser)]
#[command(name = "bd", version, about = "Local issue tracker daemon and sync engine")]
pub struct Cli {
    /// Verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Actor recorded on mutations.
    #[arg(long, global = true, env = "BEADS_ACTOR")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a beads workspace in the current directory.
    Init {
        /// Issue id prefix (e.g. "bd").
        #[arg(long, default_value = "bd")]
        prefix: String,
        /// VCS branch the log syncs through.
        #[arg(long, env = "BEADS_SYNC_BRANCH")]
        sync_branch: Option<String>,
        /// Reinitialize over an existing workspace.
        #[arg(long)]
        force: bool,
    },

    /// Run the daemon for this workspace in the foreground.
    Daemon,

    /// Show the running daemon's status.
    Status,

    /// Ask the running daemon to shut down.
    Stop,

    /// Import the log if newer, then flush dirty issues back out.
    Sync,

    /// Import the JSONL log into the database.
    Import(commands::sync_cmd::ImportCliArgs),

    /// Export the database to the JSONL log.
    Export {
        /// Bypass the data-loss safety guards.
        #[arg(long)]
        force: bool,
    },
}
