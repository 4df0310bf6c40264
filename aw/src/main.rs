//! aw - agent worker entry point

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use jobstore::{Autonomy, Job, JobStart, JobStatus, ResolvedConfig, StoreHandle};
use tracing::{error, info};

use agentworker::cli::{Cli, Command};
use agentworker::config::WorkerConfig;
use agentworker::runner::JobRunner;
use agentworker::server::{AppState, serve};

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

    let config = match WorkerConfig::load(cli.config.as_ref()) {
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

async fn run(cli: Cli, config: WorkerConfig) -> Result<()> {
    match cli.command {
        Command::Serve { port } => {
            let store = StoreHandle::spawn(&config.storage.database).context("Failed to open job store")?;
            let bind = config.server.bind.clone();
            let port = port.unwrap_or(config.server.port);

            let runner = Arc::new(JobRunner::new(config, store.clone()));
            serve(AppState { runner, store }, &bind, port).await
        }

        Command::Run {
            description,
            expert,
            autonomy,
        } => {
            let autonomy: Autonomy = autonomy.parse().map_err(|e: String| eyre::eyre!(e))?;
            let store = StoreHandle::spawn(&config.storage.database).context("Failed to open job store")?;

            // Ad-hoc job row so progress lands somewhere inspectable
            let mut job = Job::new(description.clone(), expert.clone(), autonomy);
            job.status = JobStatus::Pending;
            let job_id = job.id.clone();
            store.create_job(job).await?;
            store.update_status(&job_id, JobStatus::Assigned, None).await?;
            store.update_status(&job_id, JobStatus::Running, None).await?;

            let mut resolved = ResolvedConfig::default();
            resolved.autonomy = autonomy;

            let payload = JobStart {
                job_id: job_id.clone(),
                description,
                expert_id: expert,
                resolved_config: resolved,
                datasources: vec![],
                uploads: vec![],
                autonomy,
                workspace_git_remote: None,
            };

            let runner = JobRunner::new(config, store.clone());
            runner.start(payload).await.map_err(|e| eyre::eyre!(e.to_string()))?;
            info!(%job_id, "Job running; waiting for it to finish");
            runner.join().await;

            let job = store.get_job_required(&job_id).await?;
            println!("job {} finished with status {}", job.id, job.status);
            if let Some(error) = job.error_message {
                println!("error: {}", error);
            }
            Ok(())
        }

        Command::Status { url } => {
            let status: jobstore::WorkerStatus = reqwest::get(format!("{}/status", url.trim_end_matches('/')))
                .await
                .context("Worker unreachable")?
                .json()
                .await
                .context("Malformed status response")?;

            if status.busy {
                println!(
                    "busy: job {} phase {} ({}) iteration {} tokens in/out {}/{}",
                    status.job_id.as_deref().unwrap_or("?"),
                    status.phase_number,
                    status.phase.as_deref().unwrap_or("?"),
                    status.iteration_count,
                    status.tokens.input_tokens,
                    status.tokens.output_tokens,
                );
            } else {
                println!("idle");
            }
            Ok(())
        }
    }
}
