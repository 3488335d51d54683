//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ap-server")]
#[command(author, version, about = "Batch action processor", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging to the console
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the event processor until interrupted
    Worker,

    /// Run a single processing cycle and print its report
    RunOnce,

    /// Upload a file as a new batch
    Upload {
        /// Path to a .csv or .txt file
        file: PathBuf,

        /// Uploader identity
        #[arg(short, long, env = "AP_OWNER")]
        owner: String,
    },

    /// Show progress of a batch
    Status {
        batch_id: Uuid,
    },

    /// List failed events
    Failed {
        /// Only events of this batch
        #[arg(long, conflicts_with = "owner")]
        batch: Option<Uuid>,

        /// Only events of this owner's batches
        #[arg(long)]
        owner: Option<String>,
    },

    /// Reset failed events of a finished batch for another pass
    Retry {
        batch_id: Uuid,

        /// Require the batch to belong to this owner
        #[arg(long)]
        owner: Option<String>,

        /// Retry only these events (repeatable)
        #[arg(long = "event-id")]
        event_ids: Vec<Uuid>,
    },

    /// List batches, newest first
    Batches {
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        page: Option<i64>,

        #[arg(long)]
        per_page: Option<i64>,
    },

    /// Check whether an owner may upload a new file
    OwnerStatus {
        owner: String,
    },

    /// Release events stuck in Processing back to Pending
    Reclaim {
        /// Minimum claim age in seconds
        #[arg(long)]
        older_than_secs: u64,
    },

    /// Apply database migrations
    Migrate,
}
