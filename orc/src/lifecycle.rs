//! Orchestrator service - job lifecycle, dispatch, and callbacks
//!
//! Owns the jobs and datasources tables. Workers never write job rows;
//! they propose transitions through status callbacks which are validated
//! against the legal transition table here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use jobstore::{
    Autonomy, Datasource, DatasourceKind, Job, JobResume, JobStart, JobStatus, JobSubmission, StatusReport,
    StoreError, StoreHandle, Upload,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::expert;
use crate::resolve::resolve_job_config;
use crate::workers::{WorkerError, WorkerPool};

/// The orchestrator's service core, shared by the HTTP API, the CLI, and
/// the assignment loop
pub struct Orchestrator {
    store: StoreHandle,
    pool: WorkerPool,
    defaults: Value,
    experts_dir: PathBuf,
    uploads_dir: PathBuf,
    wall_clock: Duration,
}

impl Orchestrator {
    pub fn new(store: StoreHandle, pool: WorkerPool, config: &OrchestratorConfig) -> Result<Self> {
        let defaults = expert::load_defaults(&config.experts.defaults_file)?;
        let uploads_dir = config.storage.database.with_extension("uploads");
        Ok(Self {
            store,
            pool,
            defaults,
            experts_dir: config.experts.dir.clone(),
            uploads_dir,
            wall_clock: Duration::from_secs(config.assignment.wall_clock_days * 24 * 60 * 60),
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Accept a job submission: create the row, attach datasources, spool
    /// uploads, and queue it for assignment.
    pub async fn submit(&self, submission: JobSubmission) -> Result<Job> {
        let mut job = Job::new(
            submission.description,
            submission.expert_id,
            submission.autonomy.unwrap_or(Autonomy::Full),
        );
        if let Some(config_override) = submission.config_override {
            job.config_override = config_override;
        }
        let job_id = job.id.clone();
        self.store.create_job(job).await?;

        for ds_id in &submission.datasource_ids {
            self.attach_datasource(&job_id, ds_id).await?;
        }

        if !submission.uploads.is_empty() {
            self.spool_uploads(&job_id, &submission.uploads)?;
        }

        let job = self.store.update_status(&job_id, JobStatus::Pending, None).await?;
        info!(job_id = %job.id, expert = %job.expert_id, autonomy = %job.autonomy, "job submitted");
        Ok(job)
    }

    /// Attach an existing datasource to a job. Global datasources are
    /// cloned into job scope; a datasource scoped to another job is a
    /// conflict.
    async fn attach_datasource(&self, job_id: &str, ds_id: &str) -> Result<()> {
        let ds = self
            .store
            .get_datasource(ds_id)
            .await?
            .ok_or_else(|| eyre!("datasource {} not found", ds_id))?;

        match &ds.job_id {
            Some(owner) if owner == job_id => Ok(()),
            Some(owner) => Err(eyre!("datasource {} is scoped to job {}", ds_id, owner)),
            None => {
                let mut scoped = Datasource::scoped(ds.kind, ds.name.clone(), ds.connection_url.clone(), job_id);
                scoped.description = ds.description.clone();
                scoped.credentials = ds.credentials.clone();
                scoped.read_only = ds.read_only;
                self.store.create_datasource(scoped).await?;
                Ok(())
            }
        }
    }

    fn spool_uploads(&self, job_id: &str, uploads: &[Upload]) -> Result<()> {
        let dir = self.uploads_dir.join(job_id);
        std::fs::create_dir_all(&dir)?;
        let manifest = serde_json::to_string(uploads)?;
        std::fs::write(dir.join("uploads.json"), manifest)?;
        Ok(())
    }

    fn load_uploads(&self, job_id: &str) -> Vec<Upload> {
        let path = self.uploads_dir.join(job_id).join("uploads.json");
        if !path.exists() {
            return vec![];
        }
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Seed global datasources from the DEFAULT_DS_* environment variables
    /// at startup. Scopes already bound stay untouched.
    pub async fn seed_default_datasources(&self) -> Result<usize> {
        let mut created = 0;
        for kind in DatasourceKind::ALL {
            let prefix = format!("DEFAULT_DS_{}", kind.as_str().to_uppercase());
            let Ok(url) = std::env::var(format!("{}_URL", prefix)) else {
                continue;
            };
            let name = std::env::var(format!("{}_NAME", prefix)).unwrap_or_else(|_| kind.as_str().to_string());
            let read_only = std::env::var(format!("{}_READ_ONLY", prefix))
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

            let mut ds = Datasource::global(kind, name, url);
            ds.read_only = read_only;
            if kind == DatasourceKind::Neo4j
                && let (Ok(user), Ok(pass)) = (std::env::var("NEO4J_USERNAME"), std::env::var("NEO4J_PASSWORD"))
            {
                ds.credentials = Some(format!("{}:{}", user, pass));
            }

            match self.store.create_datasource(ds).await {
                Ok(()) => {
                    info!(kind = %kind, "seeded default datasource from environment");
                    created += 1;
                }
                Err(StoreError::Conflict(_)) => {
                    // A binding for this kind already exists; leave it alone
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(created)
    }

    /// Apply a worker status callback: persist counters, then the status
    /// flip when it is legal. Illegal proposals are logged and dropped.
    pub async fn apply_report(&self, report: StatusReport) -> Result<()> {
        self.store.record_progress(report.clone()).await?;

        let job = self.store.get_job_required(&report.job_id).await?;
        if job.status == report.status {
            return Ok(());
        }
        if job.status.can_transition_to(report.status) {
            self.store
                .update_status(&report.job_id, report.status, report.error_message)
                .await?;
        } else {
            warn!(
                job_id = %report.job_id,
                from = %job.status,
                to = %report.status,
                "worker proposed an illegal transition; ignored"
            );
        }
        Ok(())
    }

    /// Build the JobStart payload for an assigned job
    pub async fn build_start_payload(&self, job: &Job) -> Result<JobStart> {
        let bundle = expert::load_expert(&self.experts_dir, &job.expert_id)
            .context(format!("expert bundle {}", job.expert_id))?;
        let datasources = self.store.resolve_datasources(&job.id).await?;
        let (resolved_config, bindings) = resolve_job_config(&self.defaults, &bundle, job, &datasources)?;

        Ok(JobStart {
            job_id: job.id.clone(),
            description: job.description.clone(),
            expert_id: job.expert_id.clone(),
            resolved_config,
            datasources: bindings,
            uploads: self.load_uploads(&job.id),
            autonomy: job.autonomy,
            workspace_git_remote: None,
        })
    }

    /// One assignment pass: pair the oldest pending job with an idle
    /// worker. Returns the assigned job id, if any.
    pub async fn assign_once(&self) -> Result<Option<String>> {
        let Some(worker) = self.pool.find_idle().await else {
            return Ok(None);
        };

        let Some(job) = self.store.claim_pending(worker.base_url()).await? else {
            return Ok(None);
        };
        let job_id = job.id.clone();

        let payload = match self.build_start_payload(&job).await {
            Ok(payload) => payload,
            Err(e) => {
                // Fatal config: fail fast with an explicit message
                warn!(job_id = %job_id, error = %e, "config resolution failed");
                self.store
                    .update_status(&job_id, JobStatus::Failed, Some(format!("config resolution failed: {e}")))
                    .await?;
                return Ok(None);
            }
        };

        match worker.start(&payload).await {
            Ok(()) => {
                self.store.update_status(&job_id, JobStatus::Running, None).await?;
                info!(job_id = %job_id, worker = %worker.base_url(), "job dispatched");
                Ok(Some(job_id))
            }
            Err(e) if e.is_payload_fault() => {
                warn!(job_id = %job_id, error = %e, "worker rejected payload");
                self.store
                    .update_status(&job_id, JobStatus::Pending, Some(e.to_string()))
                    .await?;
                Ok(None)
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "dispatch failed, requeueing");
                self.store.update_status(&job_id, JobStatus::Pending, None).await?;
                Ok(None)
            }
        }
    }

    /// Cancel a job. Queued jobs flip immediately; active jobs get a
    /// cooperative cancel forwarded to their worker and flip when the
    /// worker's final callback arrives.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let job = self.store.get_job_required(job_id).await?;
        match job.status {
            JobStatus::Created | JobStatus::Pending | JobStatus::PendingReview | JobStatus::Frozen => {
                Ok(self.store.update_status(job_id, JobStatus::Cancelled, None).await?)
            }
            JobStatus::Assigned | JobStatus::Running => {
                if let Some(url) = &job.worker_url
                    && let Some(worker) = self.pool.by_url(url)
                    && let Err(e) = worker.cancel(job_id).await
                {
                    warn!(job_id, error = %e, "cancel forwarding failed");
                }
                Ok(job)
            }
            status => Err(eyre!("job {} is already {}", job_id, status)),
        }
    }

    /// Resume a job out of review, optionally with feedback
    pub async fn resume(&self, job_id: &str, approved: bool, feedback: Option<String>) -> Result<Job> {
        let job = self.store.get_job_required(job_id).await?;
        if job.status != JobStatus::PendingReview {
            return Err(eyre!("job {} is {}, not pending_review", job_id, job.status));
        }

        let worker = job
            .worker_url
            .as_deref()
            .and_then(|url| self.pool.by_url(url))
            .ok_or_else(|| eyre!("no worker available for job {}", job_id))?;

        let payload = JobResume {
            job_id: job_id.to_string(),
            approved,
            feedback_text: feedback,
            feedback_commits: vec![],
        };
        match worker.resume(&payload).await {
            Ok(()) => Ok(self.store.update_status(job_id, JobStatus::Running, None).await?),
            Err(WorkerError::Busy) => Err(eyre!("worker for job {} is busy", job_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail jobs that exceeded the wall-clock budget
    pub async fn sweep_timeouts(&self) -> Result<usize> {
        let mut failed = 0;
        for status in [JobStatus::Assigned, JobStatus::Running] {
            for job in self.store.list_jobs(Some(status)).await? {
                let started = job.started_at.unwrap_or(job.created_at);
                let age_ms = jobstore::now_ms().saturating_sub(started);
                if age_ms as u128 > self.wall_clock.as_millis() {
                    warn!(job_id = %job.id, "wall-clock budget exceeded");
                    if let Some(url) = &job.worker_url
                        && let Some(worker) = self.pool.by_url(url)
                    {
                        let _ = worker.cancel(&job.id).await;
                    }
                    self.store
                        .update_status(&job.id, JobStatus::Failed, Some("wall-clock timeout exceeded".to_string()))
                        .await?;
                    failed += 1;
                }
            }
        }
        Ok(failed)
    }
}

/// Convenience constructor for tests and embedded use
pub fn orchestrator_with_defaults(
    store: StoreHandle,
    pool: WorkerPool,
    experts_dir: impl AsRef<Path>,
) -> Orchestrator {
    Orchestrator {
        store,
        pool,
        defaults: Value::Object(serde_json::Map::new()),
        experts_dir: experts_dir.as_ref().to_path_buf(),
        uploads_dir: std::env::temp_dir().join("orchestrator-uploads"),
        wall_clock: Duration::from_secs(7 * 24 * 60 * 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore::{DatasourceKind, TokenTotals};
    use tempfile::tempdir;

    async fn service() -> (tempfile::TempDir, Orchestrator) {
        let temp = tempdir().unwrap();
        let store = StoreHandle::spawn_in_memory().unwrap();
        let orch = orchestrator_with_defaults(store, WorkerPool::default(), temp.path());
        (temp, orch)
    }

    fn submission(description: &str) -> JobSubmission {
        JobSubmission {
            description: description.to_string(),
            expert_id: "default".to_string(),
            autonomy: Some(Autonomy::Review),
            config_override: None,
            datasource_ids: vec![],
            uploads: vec![],
        }
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job() {
        let (_temp, orch) = service().await;
        let job = orch.submit(submission("Summarize the quarterly report")).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.autonomy, Autonomy::Review);

        let listed = orch.store().list_jobs(Some(JobStatus::Pending)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_attaches_global_datasource_as_scoped() {
        let (_temp, orch) = service().await;
        let ds = Datasource::global(DatasourceKind::Neo4j, "kg", "bolt://host");
        let ds_id = ds.id.clone();
        orch.store().create_datasource(ds).await.unwrap();

        let mut sub = submission("graph work");
        sub.datasource_ids = vec![ds_id];
        let job = orch.submit(sub).await.unwrap();

        let resolved = orch.store().resolve_datasources(&job.id).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].job_id.as_deref(), Some(job.id.as_str()));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_seed_default_datasources_from_env() {
        let (_temp, orch) = service().await;

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("DEFAULT_DS_POSTGRESQL_URL", "postgres://warehouse");
            std::env::set_var("DEFAULT_DS_POSTGRESQL_NAME", "warehouse");
            std::env::set_var("DEFAULT_DS_POSTGRESQL_READ_ONLY", "true");
        }
        let seeded = orch.seed_default_datasources().await.unwrap();

        // Seeding again is a no-op thanks to the (kind, scope) constraint
        let reseeded = orch.seed_default_datasources().await.unwrap();
        unsafe {
            std::env::remove_var("DEFAULT_DS_POSTGRESQL_URL");
            std::env::remove_var("DEFAULT_DS_POSTGRESQL_NAME");
            std::env::remove_var("DEFAULT_DS_POSTGRESQL_READ_ONLY");
        }

        assert_eq!(seeded, 1);
        assert_eq!(reseeded, 0);

        let datasources = orch.store().list_datasources().await.unwrap();
        assert_eq!(datasources.len(), 1);
        assert_eq!(datasources[0].name, "warehouse");
        assert!(datasources[0].read_only);
        assert!(datasources[0].job_id.is_none());
    }

    #[tokio::test]
    async fn test_apply_report_validates_transitions() {
        let (_temp, orch) = service().await;
        let job = orch.submit(submission("task")).await.unwrap();
        orch.store()
            .update_status(&job.id, JobStatus::Assigned, None)
            .await
            .unwrap();
        orch.store().update_status(&job.id, JobStatus::Running, None).await.unwrap();

        let report = StatusReport {
            job_id: job.id.clone(),
            status: JobStatus::PendingReview,
            phase: Some("strategic".to_string()),
            phase_number: 1,
            iteration_count: 4,
            tokens: TokenTotals {
                input_tokens: 100,
                output_tokens: 10,
            },
            error_message: None,
        };
        orch.apply_report(report).await.unwrap();

        let job = orch.store().get_job_required(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::PendingReview);
        assert_eq!(job.iteration_count, 4);

        // An illegal proposal is dropped, counters still recorded
        let bad = StatusReport {
            job_id: job.id.clone(),
            status: JobStatus::Pending,
            phase: Some("strategic".to_string()),
            phase_number: 1,
            iteration_count: 5,
            tokens: TokenTotals::default(),
            error_message: None,
        };
        orch.apply_report(bad).await.unwrap();
        let job = orch.store().get_job_required(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::PendingReview);
        assert_eq!(job.iteration_count, 5);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let (_temp, orch) = service().await;
        let job = orch.submit(submission("task")).await.unwrap();

        let cancelled = orch.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // Cancelling again is an error
        assert!(orch.cancel(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_resume_requires_pending_review() {
        let (_temp, orch) = service().await;
        let job = orch.submit(submission("task")).await.unwrap();

        let err = orch.resume(&job.id, true, None).await.unwrap_err();
        assert!(err.to_string().contains("not pending_review"));
    }

    #[tokio::test]
    async fn test_build_start_payload_resolves_config() {
        let (_temp, orch) = service().await;
        let mut sub = submission("db analysis");
        sub.autonomy = Some(Autonomy::Partial);
        let job = orch.submit(sub).await.unwrap();

        orch.store()
            .create_datasource(Datasource::global(DatasourceKind::Postgresql, "wh", "postgres://db"))
            .await
            .unwrap();

        let job = orch.store().get_job_required(&job.id).await.unwrap();
        let payload = orch.build_start_payload(&job).await.unwrap();

        assert_eq!(payload.autonomy, Autonomy::Partial);
        assert_eq!(payload.resolved_config.autonomy, Autonomy::Partial);
        assert!(payload.resolved_config.tools.categories.contains(&"sql".to_string()));
        assert_eq!(payload.datasources.len(), 1);
    }
}
