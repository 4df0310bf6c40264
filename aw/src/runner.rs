//! JobRunner - one job at a time, driven to completion or freeze
//!
//! Owns the worker's single job slot: builds the engine from a JobStart
//! payload, spawns the graph task, heartbeats status to the orchestrator,
//! and serves cancel/resume. The JobStart payload is persisted into the
//! workspace so a resume can rebuild the engine without the orchestrator
//! re-sending configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::Context as _;
use jobstore::{DatasourceKind, JobResume, JobStart, JobStatus, StatusReport, StoreHandle, WorkerStatus};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::WorkerConfig;
use crate::graph::{GraphEngine, GraphState, Progress, RunOutcome};
use crate::llm::{ChatClient, LlmError};
use crate::tools::builtin::DatasourceClient;
use crate::tools::{DatasourceAttachment, ToolRegistry};
use crate::workspace::{GitWorkspace, Workspace};

/// Where the JobStart payload is cached inside the workspace
const JOB_PAYLOAD_FILE: &str = ".agentworker/job.json";

/// Factory for chat clients; tests inject scripted ones
pub type LlmFactory =
    Arc<dyn Fn(&jobstore::LlmSettings) -> Result<Arc<dyn ChatClient>, LlmError> + Send + Sync>;

/// Errors surfaced to the HTTP layer
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Worker is busy with job {0}")]
    Busy(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Fatal config: {0}")]
    Config(String),

    #[error("No stored state for job {0}")]
    NoStoredJob(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<eyre::Report> for RunnerError {
    fn from(report: eyre::Report) -> Self {
        RunnerError::Internal(format!("{:#}", report))
    }
}

struct ActiveJob {
    job_id: String,
    cancel: Arc<AtomicBool>,
    progress: watch::Receiver<Progress>,
    task: tokio::task::JoinHandle<()>,
}

/// The worker's job slot
pub struct JobRunner {
    config: WorkerConfig,
    store: StoreHandle,
    llm_factory: LlmFactory,
    datasource_clients: HashMap<DatasourceKind, Arc<dyn DatasourceClient>>,
    http: reqwest::Client,
    current: Mutex<Option<ActiveJob>>,
}

impl JobRunner {
    pub fn new(config: WorkerConfig, store: StoreHandle) -> Self {
        Self {
            config,
            store,
            llm_factory: Arc::new(|settings| crate::llm::create_client(settings)),
            datasource_clients: HashMap::new(),
            http: reqwest::Client::new(),
            current: Mutex::new(None),
        }
    }

    /// Inject a chat-client factory (tests)
    pub fn with_llm_factory(mut self, factory: LlmFactory) -> Self {
        self.llm_factory = factory;
        self
    }

    /// Bind datasource drivers for attached kinds
    pub fn with_datasource_clients(
        mut self,
        clients: HashMap<DatasourceKind, Arc<dyn DatasourceClient>>,
    ) -> Self {
        self.datasource_clients = clients;
        self
    }

    /// Accept a JobStart: build the engine and spawn the graph task.
    ///
    /// Picks up the latest checkpoint when one exists, so re-assignment
    /// after a crash resumes at the last node boundary.
    pub async fn start(&self, payload: JobStart) -> Result<(), RunnerError> {
        if payload.job_id.trim().is_empty() {
            return Err(RunnerError::InvalidPayload("job_id is empty".to_string()));
        }
        if payload.description.trim().is_empty() {
            return Err(RunnerError::InvalidPayload("description is empty".to_string()));
        }

        let mut slot = self.current.lock().await;
        if let Some(active) = slot.as_ref() {
            if !active.task.is_finished() {
                return Err(RunnerError::Busy(active.job_id.clone()));
            }
            *slot = None;
        }

        let workspace = self.prepare_workspace(&payload)?;
        let checkpoints = CheckpointStore::new(self.store.clone());
        let state = checkpoints
            .load_latest(&payload.job_id)
            .await
            .context("load checkpoint")?
            .unwrap_or_else(|| GraphState::new(&payload.job_id));
        if state.step > 0 {
            info!(job_id = %payload.job_id, step = state.step, "resuming from checkpoint");
        }

        let engine = self.build_engine(&payload, workspace, checkpoints, state)?;
        *slot = Some(self.spawn(engine, payload.job_id.clone()));

        info!(job_id = %payload.job_id, "job started");
        Ok(())
    }

    /// Re-enter a frozen job, injecting review feedback
    pub async fn resume(&self, payload: JobResume) -> Result<(), RunnerError> {
        let mut slot = self.current.lock().await;
        if let Some(active) = slot.as_ref() {
            if !active.task.is_finished() {
                return Err(RunnerError::Busy(active.job_id.clone()));
            }
            *slot = None;
        }

        let workspace_dir = self.config.storage.workspace_root.join(&payload.job_id);
        let workspace = Workspace::open(&workspace_dir);
        let start_payload: JobStart = match workspace.read(JOB_PAYLOAD_FILE) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| RunnerError::InvalidPayload(format!("stored job payload unreadable: {}", e)))?,
            Err(_) => return Err(RunnerError::NoStoredJob(payload.job_id.clone())),
        };

        let checkpoints = CheckpointStore::new(self.store.clone());
        let state = checkpoints
            .load_latest(&payload.job_id)
            .await
            .context("load checkpoint")?
            .ok_or_else(|| RunnerError::NoStoredJob(payload.job_id.clone()))?;

        let mut engine = self.build_engine(&start_payload, workspace, checkpoints, state)?;
        engine
            .apply_resume(payload.approved, payload.feedback_text.as_deref())
            .context("apply resume feedback")?;

        *slot = Some(self.spawn(engine, payload.job_id.clone()));
        info!(job_id = %payload.job_id, approved = payload.approved, "job resumed");
        Ok(())
    }

    /// Cooperative cancel: the graph exits at the next node boundary
    pub async fn cancel(&self, job_id: &str) -> Result<(), RunnerError> {
        let slot = self.current.lock().await;
        match slot.as_ref() {
            Some(active) if active.job_id == job_id => {
                active.cancel.store(true, Ordering::Relaxed);
                info!(job_id, "cancel requested");
                Ok(())
            }
            _ => Err(RunnerError::NoStoredJob(job_id.to_string())),
        }
    }

    /// Current slot status for GET /status
    pub async fn status(&self) -> WorkerStatus {
        let slot = self.current.lock().await;
        match slot.as_ref() {
            Some(active) if !active.task.is_finished() => {
                let progress = active.progress.borrow().clone();
                WorkerStatus {
                    busy: true,
                    job_id: Some(active.job_id.clone()),
                    phase: Some(progress.phase.as_str().to_string()),
                    phase_number: progress.phase_number,
                    iteration_count: progress.iteration_count,
                    tokens: progress.tokens,
                }
            }
            _ => WorkerStatus::idle(),
        }
    }

    /// Wait for the active job task to finish (tests, drain on shutdown)
    pub async fn join(&self) {
        let task = {
            let mut slot = self.current.lock().await;
            slot.take().map(|active| active.task)
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn prepare_workspace(&self, payload: &JobStart) -> Result<Workspace, RunnerError> {
        let dir = self.config.storage.workspace_root.join(&payload.job_id);
        let workspace = Workspace::init(&dir, &[]).map_err(|e| RunnerError::Internal(e.to_string()))?;

        for upload in &payload.uploads {
            let path = format!("uploads/{}", upload.path);
            workspace
                .write(&path, &upload.content)
                .map_err(|e| RunnerError::InvalidPayload(format!("upload {}: {}", upload.path, e)))?;
        }

        let payload_json = serde_json::to_string_pretty(payload)
            .map_err(|e| RunnerError::InvalidPayload(e.to_string()))?;
        workspace
            .write(JOB_PAYLOAD_FILE, &payload_json)
            .map_err(|e| RunnerError::Internal(e.to_string()))?;

        Ok(workspace)
    }

    fn build_engine(
        &self,
        payload: &JobStart,
        workspace: Workspace,
        checkpoints: CheckpointStore,
        state: GraphState,
    ) -> Result<GraphEngine, RunnerError> {
        let llm = (self.llm_factory)(&payload.resolved_config.llm)
            .map_err(|e| RunnerError::Config(e.to_string()))?;

        let attachments: Vec<DatasourceAttachment> = payload
            .datasources
            .iter()
            .map(|b| DatasourceAttachment {
                kind: b.kind,
                read_only: b.read_only,
            })
            .collect();
        let registry = ToolRegistry::build(&payload.resolved_config, &attachments, &self.datasource_clients);

        let git_enabled = payload.resolved_config.workspace.git;
        let mut engine = GraphEngine::new(
            state,
            payload.description.clone(),
            payload.resolved_config.clone(),
            llm,
            registry,
            workspace.clone(),
            checkpoints,
        );
        if git_enabled {
            engine = engine.with_git(GitWorkspace::new(workspace.root()));
        }
        Ok(engine)
    }

    fn spawn(&self, engine: GraphEngine, job_id: String) -> ActiveJob {
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = engine.with_cancel_flag(cancel.clone());

        let (progress_tx, progress_rx) = watch::channel(Progress {
            phase: engine.state().current_phase,
            phase_number: engine.state().phase_number,
            iteration_count: engine.state().iteration_count,
            tokens: engine.state().tokens,
        });
        let engine = engine.with_progress(progress_tx);

        let reporter = Reporter {
            http: self.http.clone(),
            callback_url: self.config.orchestrator.url.clone(),
            store: self.store.clone(),
        };
        let heartbeat = Duration::from_secs(self.config.orchestrator.heartbeat_secs);
        let task_job_id = job_id.clone();
        let task_progress = progress_rx.clone();

        let task = tokio::spawn(async move {
            drive_job(engine, reporter, task_job_id, task_progress, heartbeat).await;
        });

        ActiveJob {
            job_id,
            cancel,
            progress: progress_rx,
            task,
        }
    }
}

/// Run the engine while heartbeating; send the terminal report at the end
async fn drive_job(
    mut engine: GraphEngine,
    reporter: Reporter,
    job_id: String,
    mut progress: watch::Receiver<Progress>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick is immediate

    let mut latest = progress.borrow().clone();
    let mut last_phase = latest.phase_number;
    let mut watch_alive = true;

    let run = engine.run();
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            _ = ticker.tick() => {
                reporter.send(running_report(&job_id, &latest)).await;
            }
            changed = progress.changed(), if watch_alive => {
                if changed.is_err() {
                    watch_alive = false;
                    continue;
                }
                latest = progress.borrow_and_update().clone();
                // Immediate callback at phase transitions
                if latest.phase_number != last_phase {
                    last_phase = latest.phase_number;
                    reporter.send(running_report(&job_id, &latest)).await;
                }
            }
        }
    };

    let snapshot = progress.borrow().clone();
    let report = match outcome {
        Ok(RunOutcome::Completed(_)) => terminal_report(&job_id, &snapshot, JobStatus::Completed, None),
        Ok(RunOutcome::Frozen) => terminal_report(&job_id, &snapshot, JobStatus::PendingReview, None),
        Ok(RunOutcome::Cancelled) => terminal_report(&job_id, &snapshot, JobStatus::Cancelled, None),
        Ok(RunOutcome::Failed(reason)) => terminal_report(&job_id, &snapshot, JobStatus::Failed, Some(reason)),
        Err(e) => terminal_report(&job_id, &snapshot, JobStatus::Failed, Some(e.to_string())),
    };
    reporter.send(report).await;
}

fn running_report(job_id: &str, progress: &Progress) -> StatusReport {
    StatusReport {
        job_id: job_id.to_string(),
        status: JobStatus::Running,
        phase: Some(progress.phase.as_str().to_string()),
        phase_number: progress.phase_number,
        iteration_count: progress.iteration_count,
        tokens: progress.tokens,
        error_message: None,
    }
}

fn terminal_report(job_id: &str, progress: &Progress, status: JobStatus, error: Option<String>) -> StatusReport {
    StatusReport {
        job_id: job_id.to_string(),
        status,
        phase: Some(progress.phase.as_str().to_string()),
        phase_number: progress.phase_number,
        iteration_count: progress.iteration_count,
        tokens: progress.tokens,
        error_message: error,
    }
}

/// Sends status reports to the orchestrator, or straight to the store in
/// dev mode (no callback URL configured)
#[derive(Clone)]
struct Reporter {
    http: reqwest::Client,
    callback_url: Option<String>,
    store: StoreHandle,
}

impl Reporter {
    async fn send(&self, report: StatusReport) {
        match &self.callback_url {
            Some(base) => {
                let url = format!("{}/jobs/{}/status", base.trim_end_matches('/'), report.job_id);
                match self.http.post(&url).json(&report).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(job_id = %report.job_id, status = %report.status, "status callback sent");
                    }
                    Ok(response) => {
                        warn!(job_id = %report.job_id, status = %response.status(), "status callback rejected");
                    }
                    Err(e) => {
                        warn!(job_id = %report.job_id, error = %e, "status callback failed");
                    }
                }
            }
            None => {
                // Dev mode: write progress directly, best-effort
                if let Err(e) = self.store.record_progress(report.clone()).await {
                    debug!(job_id = %report.job_id, error = %e, "progress write skipped");
                }
                let current = self.store.get_job(&report.job_id).await.ok().flatten();
                if let Some(job) = current {
                    if job.status != report.status && job.status.can_transition_to(report.status) {
                        let _ = self
                            .store
                            .update_status(&report.job_id, report.status, report.error_message.clone())
                            .await;
                    }
                }
            }
        }
    }
}
