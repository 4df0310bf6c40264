//! CLI command definitions for the orchestrator

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// orc - orchestrator
#[derive(Parser)]
#[command(
    name = "orc",
    about = "Orchestrator: owns jobs, resolves config, assigns work to agent workers",
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
    /// Serve the orchestrator API and run the assignment loop
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Submit a job to a running orchestrator
    Submit {
        /// Task description
        description: String,

        /// Expert id
        #[arg(short, long, default_value = "default")]
        expert: String,

        /// Autonomy level (full, review, partial, guided, dependent)
        #[arg(short, long, default_value = "full")]
        autonomy: String,

        /// Orchestrator base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },

    /// List jobs
    Jobs {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Orchestrator base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },

    /// Cancel a job
    Cancel {
        job_id: String,

        /// Orchestrator base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },

    /// Resume a job out of review
    Resume {
        job_id: String,

        /// Approve the work as-is
        #[arg(long)]
        approve: bool,

        /// Feedback text for the agent
        #[arg(short, long)]
        feedback: Option<String>,

        /// Orchestrator base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}
