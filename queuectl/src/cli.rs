//! Command-line arguments.

use clap::{Parser, Subcommand};
use queuectl::database::models::JobState;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "queuectl", version, about = "Durable background job queue backed by SQLite")]
pub struct Cli {
    /// Database file, overrides QUEUECTL_DB
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a job described as JSON, e.g. '{"id":"a","command":"echo hi"}'
    Enqueue {
        /// Job JSON
        job: String,
        /// Retry budget for this job, overrides QUEUECTL_MAX_RETRIES
        #[arg(long)]
        max_retries: Option<i64>,
    },
    /// List active jobs
    List {
        /// pending, processing, completed, failed or dead
        #[arg(long)]
        state: Option<JobState>,
    },
    /// Show job counts by state
    Status,
    /// Inspect or retry dead-lettered jobs
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Show captured output and runtimes for a job
    Logs {
        job_id: String,
    },
    /// Run workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Return jobs stuck in processing to pending
    Recover {
        /// Only jobs not updated for at least this many seconds
        #[arg(long, default_value_t = 300)]
        older_than_secs: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum DlqCommands {
    /// List dead letters
    List,
    /// Move a dead letter back to the queue
    Retry { job_id: String },
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Start workers in the foreground until Ctrl-C
    Start {
        /// Number of workers, overrides QUEUECTL_WORKER_COUNT
        #[arg(long)]
        count: Option<usize>,
    },
}
