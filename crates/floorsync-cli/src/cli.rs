use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use floorsync_core::ChangeType;

#[derive(Parser)]
#[command(name = "floorsync")]
#[command(about = "Queue floor-plan and booking edits offline and sync them when the server is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local change log
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local change
    Enqueue {
        /// Kind of change
        #[arg(long = "type", value_enum)]
        change_type: ChangeKind,
        /// Model the change targets (FloorPlan, Room or Booking)
        #[arg(long, value_name = "NAME")]
        model: String,
        /// Server id of the object (required for update and delete)
        #[arg(long, value_name = "ID")]
        object_id: Option<String>,
        /// Object version the edit was made against
        #[arg(long, value_name = "N", default_value_t = 0)]
        version: i64,
        /// Field values as a JSON object
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
    /// List changes waiting to be synced
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show server reachability and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync pending changes once
    Sync {
        /// How to settle conflicts the server reports
        #[arg(long, value_enum, default_value_t = ConflictStrategy::Ask)]
        strategy: ConflictStrategy,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Run,
    /// List changes that stopped retrying after repeated failures
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a dead-lettered change back in the queue
    Requeue {
        /// Change id
        id: String,
    },
    /// Delete synced records from the change log
    Purge,
    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl From<ChangeKind> for ChangeType {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Create => Self::Create,
            ChangeKind::Update => Self::Update,
            ChangeKind::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConflictStrategy {
    /// Prompt for each conflict
    Ask,
    /// Resubmit local values against the server's version
    Mine,
    /// Drop local values and keep the server's
    Server,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the settings file
    Init {
        /// Base URL of the sync server
        #[arg(long, value_name = "URL")]
        server_url: String,
        /// Bearer token sent with every request
        #[arg(long, value_name = "TOKEN")]
        auth_token: Option<String>,
        /// Request timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Print the effective settings (token redacted)
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
