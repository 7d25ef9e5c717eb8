//! CLI command definitions and argument parsing

use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(name = "govsync")]
#[command(about = "Sync governance delegations to a tracked delegatee into Redis")]
#[command(version)]
pub struct Cli {
    /// Enable verbose debug logging (default: info level)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run one incremental delegation sync
    Sync {
        /// Start every token from this block instead of its stored cursor
        #[arg(long)]
        from_block: Option<u64>,
    },
    /// Sync continuously until interrupted
    Watch {
        /// Seconds between runs (defaults to sync.watch_interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show per-token delegation statistics
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List active delegators, largest first
    Delegators {
        /// Maximum number of delegators to show
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
    /// Re-read one delegator's status on every token
    Refresh {
        /// Delegator address
        address: String,
    },
    /// Show the stored summary for one delegator
    Summary {
        /// Delegator address
        address: String,
    },
    /// Show cursors, run state, and pending failed ranges
    Status,
    /// Show current configuration
    Config,
}
