//! js - job store inspection CLI

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;

use jobstore::cli::{Cli, Command};
use jobstore::{JobStatus, Store};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let database = cli
        .database
        .or_else(|| std::env::var("DATABASE_URL").ok().map(PathBuf::from))
        .ok_or_else(|| eyre!("No database given: pass --database or set DATABASE_URL"))?;

    let store = Store::open(&database).context("Failed to open job store")?;

    match cli.command {
        Command::Jobs { status } => {
            let filter = match status {
                Some(s) => Some(s.parse::<JobStatus>().map_err(|e| eyre!(e))?),
                None => None,
            };
            let jobs = store.list_jobs(filter)?;
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            for job in jobs {
                let status = match job.status {
                    JobStatus::Completed => job.status.as_str().green(),
                    JobStatus::Failed | JobStatus::Cancelled => job.status.as_str().red(),
                    JobStatus::Running | JobStatus::Assigned => job.status.as_str().cyan(),
                    JobStatus::PendingReview | JobStatus::Frozen => job.status.as_str().yellow(),
                    _ => job.status.as_str().normal(),
                };
                println!(
                    "{}  {:>14}  phase {:>2} ({})  iter {:>4}  {}",
                    job.id.bold(),
                    status,
                    job.phase_number,
                    job.phase.as_deref().unwrap_or("-"),
                    job.iteration_count,
                    truncate(&job.description, 60),
                );
            }
        }
        Command::Datasources => {
            let datasources = store.list_datasources()?;
            if datasources.is_empty() {
                println!("No datasources");
                return Ok(());
            }
            for ds in datasources {
                let scope = match &ds.job_id {
                    Some(job_id) => format!("job:{}", job_id),
                    None => "global".to_string(),
                };
                let mode = if ds.read_only { "ro" } else { "rw" };
                println!(
                    "{}  {:>10}  {:>7}  [{}]  {}",
                    ds.id.bold(),
                    ds.kind.as_str().cyan(),
                    scope,
                    mode,
                    ds.name,
                );
            }
        }
        Command::Checkpoints { job_id } => {
            let checkpoints = store.list_checkpoints(&job_id)?;
            if checkpoints.is_empty() {
                println!("No checkpoints for job {}", job_id);
                return Ok(());
            }
            for cp in checkpoints {
                println!("step {:>5}  {} bytes  at {}", cp.step, cp.blob.len(), cp.created_at);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}
