//! orc - orchestrator entry point

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use jobstore::{Job, JobStatus, StoreHandle};
use tracing::error;

use orchestrator::assign::run_assignment_loop;
use orchestrator::cli::{Cli, Command};
use orchestrator::config::OrchestratorConfig;
use orchestrator::lifecycle::Orchestrator;
use orchestrator::server::{AppState, serve};
use orchestrator::workers::WorkerPool;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match OrchestratorConfig::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };
    if let Err(e) = config.validate() {
        error!("Configuration error: {:#}", e);
        return ExitCode::from(2);
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            if msg.contains("Database") || msg.contains("store") {
                ExitCode::from(3)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli, config: OrchestratorConfig) -> Result<()> {
    match cli.command {
        Command::Serve { port } => {
            let store = StoreHandle::spawn(&config.storage.database).context("Failed to open job store")?;
            let pool = WorkerPool::new(&config.workers);
            if pool.is_empty() {
                tracing::warn!("no workers configured; jobs will queue until a worker is added");
            }

            let orchestrator = Arc::new(Orchestrator::new(store, pool, &config)?);
            let seeded = orchestrator.seed_default_datasources().await?;
            if seeded > 0 {
                tracing::info!(seeded, "default datasources created from environment");
            }

            let interval = Duration::from_secs(config.assignment.interval_secs);
            tokio::spawn(run_assignment_loop(orchestrator.clone(), interval));

            let bind = config.server.bind.clone();
            let port = port.unwrap_or(config.server.port);
            serve(AppState { orchestrator }, &bind, port).await
        }

        Command::Submit {
            description,
            expert,
            autonomy,
            url,
        } => {
            let response = reqwest::Client::new()
                .post(format!("{}/jobs", url.trim_end_matches('/')))
                .json(&serde_json::json!({
                    "description": description,
                    "expert_id": expert,
                    "autonomy": autonomy,
                }))
                .send()
                .await
                .context("Orchestrator unreachable")?;

            if !response.status().is_success() {
                eyre::bail!("submission rejected ({}): {}", response.status(), response.text().await.unwrap_or_default());
            }
            let body: serde_json::Value = response.json().await?;
            println!("{}", body["job_id"].as_str().unwrap_or("?"));
            Ok(())
        }

        Command::Jobs { status, url } => {
            let mut request = reqwest::Client::new().get(format!("{}/jobs", url.trim_end_matches('/')));
            if let Some(status) = status {
                request = request.query(&[("status", status)]);
            }
            let jobs: Vec<Job> = request
                .send()
                .await
                .context("Orchestrator unreachable")?
                .json()
                .await
                .context("Malformed jobs response")?;

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
                    "{}  {:>14}  phase {:>2}  iter {:>4}  {}",
                    job.id.bold(),
                    status,
                    job.phase_number,
                    job.iteration_count,
                    job.description.lines().next().unwrap_or(""),
                );
            }
            Ok(())
        }

        Command::Cancel { job_id, url } => {
            let response = reqwest::Client::new()
                .post(format!("{}/jobs/{}/cancel", url.trim_end_matches('/'), job_id))
                .send()
                .await
                .context("Orchestrator unreachable")?;
            if !response.status().is_success() {
                eyre::bail!("cancel rejected ({}): {}", response.status(), response.text().await.unwrap_or_default());
            }
            println!("cancel requested for {}", job_id);
            Ok(())
        }

        Command::Resume {
            job_id,
            approve,
            feedback,
            url,
        } => {
            let response = reqwest::Client::new()
                .post(format!("{}/jobs/{}/resume", url.trim_end_matches('/'), job_id))
                .json(&serde_json::json!({"approved": approve, "feedback": feedback}))
                .send()
                .await
                .context("Orchestrator unreachable")?;
            if !response.status().is_success() {
                eyre::bail!("resume rejected ({}): {}", response.status(), response.text().await.unwrap_or_default());
            }
            println!("resume dispatched for {}", job_id);
            Ok(())
        }
    }
}
