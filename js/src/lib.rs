//! JobStore - shared persistence and wire types for the agent platform
//!
//! One SQLite database holds the three durable tables the platform runs on:
//!
//! - `jobs` - owned by the orchestrator; workers propose transitions
//! - `datasources` - external DB bindings, global or job-scoped
//! - `checkpoints` - append-only serialized graph state, worker-written
//!
//! The crate also carries the types both processes speak: domain records,
//! the JobStart/JobResume/StatusReport payloads, and the resolved-config
//! bundle with its deep-merge rule.

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod store;

pub use config::{ContextSettings, LlmSettings, PhaseSettings, ResolvedConfig, ToolSettings, WorkspaceSettings, deep_merge};
pub use domain::{Autonomy, Checkpoint, Datasource, DatasourceKind, Job, JobStatus, TokenTotals};
pub use error::StoreError;
pub use handle::StoreHandle;
pub use protocol::{
    CancelRequest, DatasourceBinding, JobResume, JobStart, JobSubmission, ResumeRequest, StatusReport, Upload,
    WorkerStatus,
};
pub use store::Store;

/// Current time as unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
