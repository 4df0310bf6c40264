//! Inspection CLI for the job store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// js - inspect the platform's job store
#[derive(Parser)]
#[command(name = "js", about = "Inspect jobs, datasources, and checkpoints", version)]
pub struct Cli {
    /// Path to the SQLite database (defaults to $DATABASE_URL)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List jobs, optionally filtered by status
    Jobs {
        /// Filter by status (pending, running, completed, ...)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// List datasources
    Datasources,

    /// List checkpoints for a job
    Checkpoints {
        /// Job id
        job_id: String,
    },
}
