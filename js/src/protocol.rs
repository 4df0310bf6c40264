//! Wire payloads exchanged between the orchestrator and agent workers

use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;
use crate::domain::{Autonomy, DatasourceKind, JobStatus, TokenTotals};

/// A datasource binding shipped to the worker inside JobStart.
///
/// This is the resolved view: one entry per attached kind, credentials
/// passed through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceBinding {
    pub kind: DatasourceKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub connection_url: String,
    pub credentials: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// A document uploaded with the job submission, materialized into the
/// workspace `uploads/` directory at init
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    /// Path relative to the workspace uploads directory
    pub path: String,
    pub content: String,
}

/// POST /start body: everything a worker needs to run a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStart {
    pub job_id: String,
    pub description: String,
    pub expert_id: String,
    pub resolved_config: ResolvedConfig,
    #[serde(default)]
    pub datasources: Vec<DatasourceBinding>,
    #[serde(default)]
    pub uploads: Vec<Upload>,
    pub autonomy: Autonomy,
    /// Optional git remote the workspace pushes review branches to
    pub workspace_git_remote: Option<String>,
}

/// POST /resume body: re-enter a frozen job, optionally with feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResume {
    pub job_id: String,
    pub approved: bool,
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub feedback_commits: Vec<String>,
}

/// POST /cancel body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub job_id: String,
}

/// Worker → orchestrator status callback, sent at heartbeat intervals and
/// at every phase transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub phase: Option<String>,
    pub phase_number: u32,
    pub iteration_count: u32,
    pub tokens: TokenTotals,
    pub error_message: Option<String>,
}

/// GET /status response from a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub busy: bool,
    pub job_id: Option<String>,
    pub phase: Option<String>,
    pub phase_number: u32,
    pub iteration_count: u32,
    pub tokens: TokenTotals,
}

impl WorkerStatus {
    pub fn idle() -> Self {
        Self {
            busy: false,
            job_id: None,
            phase: None,
            phase_number: 0,
            iteration_count: 0,
            tokens: TokenTotals::default(),
        }
    }
}

/// POST /jobs body on the orchestrator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub description: String,
    pub expert_id: String,
    pub autonomy: Option<Autonomy>,
    pub config_override: Option<serde_json::Value>,
    #[serde(default)]
    pub datasource_ids: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<Upload>,
}

/// POST /jobs/{id}/resume body on the orchestrator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub approved: bool,
    pub feedback: Option<String>,
}
