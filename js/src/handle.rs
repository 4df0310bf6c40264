//! StoreHandle - actor that owns the SQLite store
//!
//! The rusqlite connection is neither Sync nor async-friendly, so a single
//! actor task owns it and processes commands via channels. Both the
//! orchestrator's HTTP handlers and the worker's checkpoint writer clone the
//! handle.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{Checkpoint, Datasource, Job, JobStatus};
use crate::error::StoreError;
use crate::protocol::StatusReport;
use crate::store::Store;

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum StoreCommand {
    CreateJob { job: Box<Job>, reply: Reply<()> },
    GetJob { id: String, reply: Reply<Option<Job>> },
    ListJobs { status: Option<JobStatus>, reply: Reply<Vec<Job>> },
    UpdateStatus { id: String, to: JobStatus, error: Option<String>, reply: Reply<Job> },
    ClaimPending { worker_url: String, reply: Reply<Option<Job>> },
    RecordProgress { report: Box<StatusReport>, reply: Reply<()> },
    CreateDatasource { ds: Box<Datasource>, reply: Reply<()> },
    GetDatasource { id: String, reply: Reply<Option<Datasource>> },
    ListDatasources { reply: Reply<Vec<Datasource>> },
    UpdateDatasource { ds: Box<Datasource>, reply: Reply<()> },
    DeleteDatasource { id: String, reply: Reply<()> },
    ResolveDatasources { job_id: String, reply: Reply<Vec<Datasource>> },
    AppendCheckpoint { job_id: String, step: u32, blob: String, reply: Reply<()> },
    LatestCheckpoint { job_id: String, reply: Reply<Option<Checkpoint>> },
    ListCheckpoints { job_id: String, reply: Reply<Vec<Checkpoint>> },
    CheckpointCount { job_id: String, reply: Reply<u32> },
    Shutdown,
}

/// Cloneable handle to the store actor
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Open the store and spawn the actor task
    pub fn spawn(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Store::open(path)?;
        Ok(Self::spawn_with(store))
    }

    /// In-memory store actor for tests
    pub fn spawn_in_memory() -> Result<Self, StoreError> {
        let store = Store::open_in_memory()?;
        Ok(Self::spawn_with(store))
    }

    fn spawn_with(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("Store actor spawned");
        Self { tx }
    }

    async fn send<T>(&self, build: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelClosed)?;
        reply_rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    pub async fn create_job(&self, job: Job) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::CreateJob { job: Box::new(job), reply }).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.send(|reply| StoreCommand::GetJob { id: id.to_string(), reply }).await
    }

    pub async fn get_job_required(&self, id: &str) -> Result<Job, StoreError> {
        self.get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        self.send(|reply| StoreCommand::ListJobs { status, reply }).await
    }

    pub async fn update_status(
        &self,
        id: &str,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Job, StoreError> {
        self.send(|reply| StoreCommand::UpdateStatus {
            id: id.to_string(),
            to,
            error,
            reply,
        })
        .await
    }

    pub async fn claim_pending(&self, worker_url: &str) -> Result<Option<Job>, StoreError> {
        self.send(|reply| StoreCommand::ClaimPending {
            worker_url: worker_url.to_string(),
            reply,
        })
        .await
    }

    pub async fn record_progress(&self, report: StatusReport) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::RecordProgress {
            report: Box::new(report),
            reply,
        })
        .await
    }

    pub async fn create_datasource(&self, ds: Datasource) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::CreateDatasource { ds: Box::new(ds), reply })
            .await
    }

    pub async fn get_datasource(&self, id: &str) -> Result<Option<Datasource>, StoreError> {
        self.send(|reply| StoreCommand::GetDatasource { id: id.to_string(), reply })
            .await
    }

    pub async fn list_datasources(&self) -> Result<Vec<Datasource>, StoreError> {
        self.send(|reply| StoreCommand::ListDatasources { reply }).await
    }

    pub async fn update_datasource(&self, ds: Datasource) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::UpdateDatasource { ds: Box::new(ds), reply })
            .await
    }

    pub async fn delete_datasource(&self, id: &str) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::DeleteDatasource { id: id.to_string(), reply })
            .await
    }

    pub async fn resolve_datasources(&self, job_id: &str) -> Result<Vec<Datasource>, StoreError> {
        self.send(|reply| StoreCommand::ResolveDatasources {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn append_checkpoint(&self, job_id: &str, step: u32, blob: String) -> Result<(), StoreError> {
        self.send(|reply| StoreCommand::AppendCheckpoint {
            job_id: job_id.to_string(),
            step,
            blob,
            reply,
        })
        .await
    }

    pub async fn latest_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        self.send(|reply| StoreCommand::LatestCheckpoint {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_checkpoints(&self, job_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.send(|reply| StoreCommand::ListCheckpoints {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn checkpoint_count(&self, job_id: &str) -> Result<u32, StoreError> {
        self.send(|reply| StoreCommand::CheckpointCount {
            job_id: job_id.to_string(),
            reply,
        })
        .await
    }

    /// Stop the actor; outstanding commands are dropped
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelClosed)
    }
}

async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("Store actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::CreateJob { job, reply } => {
                let _ = reply.send(store.create_job(&job));
            }
            StoreCommand::GetJob { id, reply } => {
                let _ = reply.send(store.get_job(&id));
            }
            StoreCommand::ListJobs { status, reply } => {
                let _ = reply.send(store.list_jobs(status));
            }
            StoreCommand::UpdateStatus { id, to, error, reply } => {
                let _ = reply.send(store.update_status(&id, to, error.as_deref()));
            }
            StoreCommand::ClaimPending { worker_url, reply } => {
                let _ = reply.send(store.claim_next_pending(&worker_url));
            }
            StoreCommand::RecordProgress { report, reply } => {
                let _ = reply.send(store.record_progress(&report));
            }
            StoreCommand::CreateDatasource { ds, reply } => {
                let _ = reply.send(store.create_datasource(&ds));
            }
            StoreCommand::GetDatasource { id, reply } => {
                let _ = reply.send(store.get_datasource(&id));
            }
            StoreCommand::ListDatasources { reply } => {
                let _ = reply.send(store.list_datasources());
            }
            StoreCommand::UpdateDatasource { ds, reply } => {
                let _ = reply.send(store.update_datasource(&ds));
            }
            StoreCommand::DeleteDatasource { id, reply } => {
                let _ = reply.send(store.delete_datasource(&id));
            }
            StoreCommand::ResolveDatasources { job_id, reply } => {
                let _ = reply.send(store.resolve_datasources(&job_id));
            }
            StoreCommand::AppendCheckpoint { job_id, step, blob, reply } => {
                let _ = reply.send(store.append_checkpoint(&job_id, step, &blob));
            }
            StoreCommand::LatestCheckpoint { job_id, reply } => {
                let _ = reply.send(store.latest_checkpoint(&job_id));
            }
            StoreCommand::ListCheckpoints { job_id, reply } => {
                let _ = reply.send(store.list_checkpoints(&job_id));
            }
            StoreCommand::CheckpointCount { job_id, reply } => {
                let _ = reply.send(store.checkpoint_count(&job_id));
            }
            StoreCommand::Shutdown => {
                info!("Store actor shutting down");
                break;
            }
        }
    }

    debug!("Store actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Autonomy, DatasourceKind};

    #[tokio::test]
    async fn test_handle_job_roundtrip() {
        let handle = StoreHandle::spawn_in_memory().unwrap();

        let mut job = Job::new("task", "default", Autonomy::Full);
        job.status = JobStatus::Pending;
        let id = job.id.clone();
        handle.create_job(job).await.unwrap();

        let loaded = handle.get_job(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);

        let claimed = handle.claim_pending("http://w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, id);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_checkpoints() {
        let handle = StoreHandle::spawn_in_memory().unwrap();

        handle.append_checkpoint("j", 1, "{}".to_string()).await.unwrap();
        handle.append_checkpoint("j", 2, "{\"x\":1}".to_string()).await.unwrap();

        let latest = handle.latest_checkpoint("j").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(handle.checkpoint_count("j").await.unwrap(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_datasources() {
        let handle = StoreHandle::spawn_in_memory().unwrap();

        let ds = Datasource::global(DatasourceKind::Mongodb, "docs", "mongodb://localhost");
        let ds_id = ds.id.clone();
        handle.create_datasource(ds).await.unwrap();

        let all = handle.list_datasources().await.unwrap();
        assert_eq!(all.len(), 1);

        let resolved = handle.resolve_datasources("any-job").await.unwrap();
        assert_eq!(resolved.len(), 1);

        handle.delete_datasource(&ds_id).await.unwrap();
        assert!(handle.list_datasources().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }
}
