use clap::{Parser, Subcommand};

use taskforge_core::JobId;
use taskforge_jobs::JobStatus;
use taskforge_observability::LogFormat;

#[derive(Debug, Parser)]
#[command(
    name = "taskforge-worker",
    version,
    about = "Background job worker and queue administration",
    propagate_version = true
)]
pub struct Cli {
    /// Database URL, e.g. sqlite://taskforge.db?mode=rwc
    #[arg(long, global = true, env = "TASKFORGE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log output format (json or pretty)
    #[arg(long, global = true, env = "TASKFORGE_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the worker loop until stopped
    Run {
        /// Process a single job and exit
        #[arg(long)]
        once: bool,

        /// Milliseconds to sleep when the queue is empty
        #[arg(long)]
        sleep: Option<u64>,

        /// Stop after this many jobs (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_jobs: u64,
    },

    /// Queue a job
    Dispatch {
        /// Job name, e.g. primes
        name: String,

        /// JSON object passed to the handler
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Cancel a pending job
    Cancel { id: JobId },

    /// Delete finished jobs
    Purge {
        /// Only jobs created more than this many days ago (0 = all)
        #[arg(long, default_value_t = 0)]
        days: u32,
    },

    /// Show queue counts per status
    Stats,

    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Run the built-in jobs under one or every strategy and report timings
    Bench {
        /// sync, async, parallel or all
        #[arg(default_value = "all")]
        mode: String,

        /// Jobs to run (default: every built-in job)
        #[arg(long = "job")]
        jobs: Vec<String>,
    },
}
