//! Core domain records shared by the orchestrator and the agent worker

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_ms;

/// Lifecycle status of a job
///
/// Owned by the orchestrator; workers propose transitions via status
/// callbacks and the orchestrator validates them against the legal
/// transition table before persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Pending,
    Assigned,
    Running,
    PendingReview,
    Frozen,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether a worker currently holds the job lease
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Running)
    }

    /// Legal transition table
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Created, Pending) => true,
            (Pending, Assigned) | (Pending, Cancelled) => true,
            // A worker that rejects the dispatch returns the job to pending
            (Assigned, Pending) => true,
            (Assigned, Running) | (Assigned, Failed) | (Assigned, Cancelled) => true,
            (Running, PendingReview)
            | (Running, Frozen)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            (PendingReview, Running) | (PendingReview, Completed) | (PendingReview, Cancelled) => true,
            (Frozen, Running) | (Frozen, Cancelled) => true,
            _ => false,
        }
    }

    /// Wire form used in the store and over HTTP
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::PendingReview => "pending_review",
            JobStatus::Frozen => "frozen",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "pending" => Ok(JobStatus::Pending),
            "assigned" => Ok(JobStatus::Assigned),
            "running" => Ok(JobStatus::Running),
            "pending_review" => Ok(JobStatus::PendingReview),
            "frozen" => Ok(JobStatus::Frozen),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Autonomy level governing where the graph freezes for human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Autonomy {
    #[default]
    Full,
    Review,
    Partial,
    Guided,
    Dependent,
}

impl Autonomy {
    /// Freeze after completing the strategic phase with the given number?
    pub fn freeze_after_strategic(&self, phase_number: u32) -> bool {
        match self {
            Autonomy::Full | Autonomy::Review => false,
            Autonomy::Partial => phase_number == 1,
            Autonomy::Guided | Autonomy::Dependent => true,
        }
    }

    /// Freeze after completing a tactical phase?
    pub fn freeze_after_tactical(&self) -> bool {
        matches!(self, Autonomy::Dependent)
    }

    /// Hold the job in review after the agent calls job_complete?
    pub fn review_on_complete(&self) -> bool {
        !matches!(self, Autonomy::Full)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Autonomy::Full => "full",
            Autonomy::Review => "review",
            Autonomy::Partial => "partial",
            Autonomy::Guided => "guided",
            Autonomy::Dependent => "dependent",
        }
    }
}

impl std::str::FromStr for Autonomy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Autonomy::Full),
            "review" => Ok(Autonomy::Review),
            "partial" => Ok(Autonomy::Partial),
            "guided" => Ok(Autonomy::Guided),
            "dependent" => Ok(Autonomy::Dependent),
            other => Err(format!("Unknown autonomy level: {}", other)),
        }
    }
}

impl std::fmt::Display for Autonomy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Accumulated token usage for a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenTotals {
    pub fn add(&mut self, other: TokenTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One work item owned by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque UUID
    pub id: String,

    /// Free-text task description
    pub description: String,

    /// Names the expert config bundle resolved at job start
    pub expert_id: String,

    /// Sparse deep-merge patch applied on top of the expert config
    #[serde(default)]
    pub config_override: serde_json::Value,

    pub status: JobStatus,
    pub autonomy: Autonomy,

    /// URL of the worker holding the lease, while assigned/running
    pub worker_url: Option<String>,

    /// Last reported phase type ("strategic" or "tactical")
    pub phase: Option<String>,
    pub phase_number: u32,
    pub iteration_count: u32,
    pub tokens: TokenTotals,

    /// Summary of the fatal class when status=failed
    pub error_message: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    /// Create a new job in Created status
    pub fn new(description: impl Into<String>, expert_id: impl Into<String>, autonomy: Autonomy) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7().to_string(),
            description: description.into(),
            expert_id: expert_id.into(),
            config_override: serde_json::json!({}),
            status: JobStatus::Created,
            autonomy,
            worker_url: None,
            phase: None,
            phase_number: 0,
            iteration_count: 0,
            tokens: TokenTotals::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Create with a fixed id (tests)
    pub fn with_id(id: impl Into<String>, description: impl Into<String>, expert_id: impl Into<String>) -> Self {
        let mut job = Self::new(description, expert_id, Autonomy::Full);
        job.id = id.into();
        job
    }
}

/// External database kind a datasource binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceKind {
    Postgresql,
    Neo4j,
    Mongodb,
}

impl DatasourceKind {
    pub const ALL: [DatasourceKind; 3] = [DatasourceKind::Postgresql, DatasourceKind::Neo4j, DatasourceKind::Mongodb];

    /// The tool category this kind injects into the resolved config
    pub fn tool_category(&self) -> &'static str {
        match self {
            DatasourceKind::Postgresql => "sql",
            DatasourceKind::Neo4j => "graph",
            DatasourceKind::Mongodb => "mongodb",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceKind::Postgresql => "postgresql",
            DatasourceKind::Neo4j => "neo4j",
            DatasourceKind::Mongodb => "mongodb",
        }
    }
}

impl std::str::FromStr for DatasourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(DatasourceKind::Postgresql),
            "neo4j" => Ok(DatasourceKind::Neo4j),
            "mongodb" => Ok(DatasourceKind::Mongodb),
            other => Err(format!("Unknown datasource kind: {}", other)),
        }
    }
}

impl std::fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An external database binding, global or scoped to a single job
///
/// At most one datasource may exist per (kind, scope); a job-scoped binding
/// shadows the global one of the same kind during resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub kind: DatasourceKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub connection_url: String,
    /// Opaque credential blob, passed through to the worker untouched
    pub credentials: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    /// None = global scope
    pub job_id: Option<String>,
    pub created_at: i64,
}

impl Datasource {
    pub fn global(kind: DatasourceKind, name: impl Into<String>, connection_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            name: name.into(),
            description: String::new(),
            connection_url: connection_url.into(),
            credentials: None,
            read_only: false,
            job_id: None,
            created_at: now_ms(),
        }
    }

    pub fn scoped(
        kind: DatasourceKind,
        name: impl Into<String>,
        connection_url: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        let mut ds = Self::global(kind, name, connection_url);
        ds.job_id = Some(job_id.into());
        ds
    }

    /// Scope key used for the (kind, scope) uniqueness constraint.
    /// Empty string is the global sentinel.
    pub fn scope_key(&self) -> &str {
        self.job_id.as_deref().unwrap_or("")
    }
}

/// Serialized graph state persisted at every node boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: String,
    /// Dense step index; append-only per job
    pub step: u32,
    /// JSON blob of the worker's graph state
    pub blob: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_happy_path() {
        assert!(JobStatus::Created.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Assigned.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::PendingReview));
        assert!(JobStatus::PendingReview.can_transition_to(JobStatus::Running));
        assert!(JobStatus::PendingReview.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_assigned_can_return_to_pending() {
        // Worker rejected the dispatch; the job goes back in the queue
        assert!(JobStatus::Assigned.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_status_transitions_rejected() {
        assert!(!JobStatus::Created.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::PendingReview.is_terminal());
    }

    #[test]
    fn test_autonomy_freeze_table() {
        // full: never freezes
        assert!(!Autonomy::Full.freeze_after_strategic(1));
        assert!(!Autonomy::Full.freeze_after_tactical());
        assert!(!Autonomy::Full.review_on_complete());

        // review: only after job_complete
        assert!(!Autonomy::Review.freeze_after_strategic(1));
        assert!(!Autonomy::Review.freeze_after_tactical());
        assert!(Autonomy::Review.review_on_complete());

        // partial: after strategic #1 and job_complete
        assert!(Autonomy::Partial.freeze_after_strategic(1));
        assert!(!Autonomy::Partial.freeze_after_strategic(3));
        assert!(!Autonomy::Partial.freeze_after_tactical());

        // guided: after every strategic
        assert!(Autonomy::Guided.freeze_after_strategic(1));
        assert!(Autonomy::Guided.freeze_after_strategic(5));
        assert!(!Autonomy::Guided.freeze_after_tactical());

        // dependent: after every phase
        assert!(Autonomy::Dependent.freeze_after_strategic(3));
        assert!(Autonomy::Dependent.freeze_after_tactical());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Created,
            JobStatus::Pending,
            JobStatus::Assigned,
            JobStatus::Running,
            JobStatus::PendingReview,
            JobStatus::Frozen,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_datasource_scope_key() {
        let global = Datasource::global(DatasourceKind::Neo4j, "kg", "bolt://localhost");
        assert_eq!(global.scope_key(), "");

        let scoped = Datasource::scoped(DatasourceKind::Postgresql, "db", "postgres://localhost", "job-1");
        assert_eq!(scoped.scope_key(), "job-1");
    }

    #[test]
    fn test_datasource_kind_tool_category() {
        assert_eq!(DatasourceKind::Postgresql.tool_category(), "sql");
        assert_eq!(DatasourceKind::Neo4j.tool_category(), "graph");
        assert_eq!(DatasourceKind::Mongodb.tool_category(), "mongodb");
    }

    #[test]
    fn test_job_new_defaults() {
        let job = Job::new("Do the thing", "default", Autonomy::Review);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.autonomy, Autonomy::Review);
        assert!(job.worker_url.is_none());
        assert_eq!(job.phase_number, 0);
        assert!(!job.id.is_empty());
    }
}
