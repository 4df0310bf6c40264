//! CLI command definitions for the agent worker

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aw - agent worker
#[derive(Parser)]
#[command(
    name = "aw",
    about = "Agent worker: runs long-lived jobs through the phase graph",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the worker HTTP API and wait for job assignments
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one job locally without an orchestrator (development)
    Run {
        /// Task description
        description: String,

        /// Expert id recorded on the job
        #[arg(short, long, default_value = "default")]
        expert: String,

        /// Autonomy level (full, review, partial, guided, dependent)
        #[arg(short, long, default_value = "full")]
        autonomy: String,
    },

    /// Query a running worker's status
    Status {
        /// Worker base URL
        #[arg(long, default_value = "http://127.0.0.1:8090")]
        url: String,
    },
}
