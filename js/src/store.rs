//! SQLite-backed store for jobs, datasources, and checkpoints
//!
//! Storage semantics the rest of the platform relies on:
//! - pending-job claims are transactional and single-winner
//! - status flips are validated against the legal transition table
//! - checkpoints are append-only per (job_id, step)

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::domain::{Autonomy, Checkpoint, Datasource, DatasourceKind, Job, JobStatus, TokenTotals};
use crate::error::StoreError;
use crate::now_ms;
use crate::protocol::StatusReport;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    description     TEXT NOT NULL,
    expert_id       TEXT NOT NULL,
    config_override TEXT NOT NULL DEFAULT '{}',
    status          TEXT NOT NULL,
    autonomy        TEXT NOT NULL,
    worker_url      TEXT,
    phase           TEXT,
    phase_number    INTEGER NOT NULL DEFAULT 0,
    iteration_count INTEGER NOT NULL DEFAULT 0,
    input_tokens    INTEGER NOT NULL DEFAULT 0,
    output_tokens   INTEGER NOT NULL DEFAULT 0,
    error_message   TEXT,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL,
    started_at      INTEGER,
    finished_at     INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);

CREATE TABLE IF NOT EXISTS datasources (
    id             TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,
    name           TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    connection_url TEXT NOT NULL,
    credentials    TEXT,
    read_only      INTEGER NOT NULL DEFAULT 0,
    job_id         TEXT,
    scope_key      TEXT NOT NULL DEFAULT '',
    created_at     INTEGER NOT NULL,
    UNIQUE (kind, scope_key)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    job_id     TEXT NOT NULL,
    step       INTEGER NOT NULL,
    blob       TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (job_id, step)
);
"#;

/// Synchronous store over a single SQLite connection.
///
/// Wrap in [`crate::StoreHandle`] for shared async access.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "Opened job store");
        Ok(Self { conn })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // === Jobs ===

    /// Insert a new job row
    pub fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        debug!(job_id = %job.id, "create_job");
        self.conn.execute(
            "INSERT INTO jobs (id, description, expert_id, config_override, status, autonomy,
                               worker_url, phase, phase_number, iteration_count,
                               input_tokens, output_tokens, error_message,
                               created_at, updated_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                job.id,
                job.description,
                job.expert_id,
                serde_json::to_string(&job.config_override)?,
                job.status.as_str(),
                job.autonomy.as_str(),
                job.worker_url,
                job.phase,
                job.phase_number,
                job.iteration_count,
                job.tokens.input_tokens as i64,
                job.tokens.output_tokens as i64,
                job.error_message,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch a job by id
    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let job = self
            .conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
            .optional()?;
        Ok(job)
    }

    /// Fetch a job, erroring when absent
    pub fn get_job_required(&self, id: &str) -> Result<Job, StoreError> {
        self.get_job(id)?.ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    /// List jobs, optionally filtered by status, newest first
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at DESC")?;
                let rows = stmt.query_map(params![s.as_str()], row_to_job)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC")?;
                let rows = stmt.query_map([], row_to_job)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
        }
        Ok(jobs)
    }

    /// Validated status transition.
    ///
    /// Sets started_at on first entry to running and finished_at on terminal
    /// statuses; records the error message for failed jobs.
    pub fn update_status(&self, id: &str, to: JobStatus, error_message: Option<&str>) -> Result<Job, StoreError> {
        let job = self.get_job_required(id)?;
        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: job.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let now = now_ms();
        let started_at = match (job.started_at, to) {
            (None, JobStatus::Running) => Some(now),
            (existing, _) => existing,
        };
        let finished_at = if to.is_terminal() { Some(now) } else { job.finished_at };

        self.conn.execute(
            "UPDATE jobs SET status = ?2, error_message = ?3, updated_at = ?4,
                             started_at = ?5, finished_at = ?6
             WHERE id = ?1",
            params![id, to.as_str(), error_message, now, started_at, finished_at],
        )?;
        debug!(job_id = %id, from = %job.status, to = %to, "update_status");
        self.get_job_required(id)
    }

    /// Claim the oldest pending job for assignment.
    ///
    /// Runs in an immediate transaction so concurrent callers get distinct
    /// jobs (the SELECT FOR UPDATE SKIP LOCKED pattern on SQLite).
    pub fn claim_next_pending(&mut self, worker_url: &str) -> Result<Option<Job>, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE status = 'pending' ORDER BY created_at, id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        let now = now_ms();
        let updated = tx.execute(
            "UPDATE jobs SET status = 'assigned', worker_url = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id, worker_url, now],
        )?;
        if updated != 1 {
            // Lost the race inside a single connection; should not happen
            return Err(StoreError::Conflict(format!("job {} claimed concurrently", id)));
        }
        tx.commit()?;

        info!(job_id = %id, worker = %worker_url, "Claimed pending job");
        Ok(Some(self.get_job_required(&id)?))
    }

    /// Persist progress counters from a worker status report
    pub fn record_progress(&self, report: &StatusReport) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE jobs SET phase = ?2, phase_number = ?3, iteration_count = ?4,
                             input_tokens = ?5, output_tokens = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                report.job_id,
                report.phase,
                report.phase_number,
                report.iteration_count,
                report.tokens.input_tokens as i64,
                report.tokens.output_tokens as i64,
                now_ms(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("job {}", report.job_id)));
        }
        Ok(())
    }

    // === Datasources ===

    /// Insert a datasource; rejects a second binding for the same
    /// (kind, scope)
    pub fn create_datasource(&self, ds: &Datasource) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO datasources (id, kind, name, description, connection_url,
                                      credentials, read_only, job_id, scope_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                ds.id,
                ds.kind.as_str(),
                ds.name,
                ds.description,
                ds.connection_url,
                ds.credentials,
                ds.read_only,
                ds.job_id,
                ds.scope_key(),
                ds.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict(format!(
                    "datasource for kind {} already exists in this scope",
                    ds.kind
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_datasource(&self, id: &str) -> Result<Option<Datasource>, StoreError> {
        let ds = self
            .conn
            .query_row("SELECT * FROM datasources WHERE id = ?1", params![id], row_to_datasource)
            .optional()?;
        Ok(ds)
    }

    pub fn list_datasources(&self) -> Result<Vec<Datasource>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM datasources ORDER BY kind, scope_key")?;
        let rows = stmt.query_map([], row_to_datasource)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Replace mutable fields of an existing datasource
    pub fn update_datasource(&self, ds: &Datasource) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE datasources SET name = ?2, description = ?3, connection_url = ?4,
                                    credentials = ?5, read_only = ?6
             WHERE id = ?1",
            params![ds.id, ds.name, ds.description, ds.connection_url, ds.credentials, ds.read_only],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("datasource {}", ds.id)));
        }
        Ok(())
    }

    pub fn delete_datasource(&self, id: &str) -> Result<(), StoreError> {
        let deleted = self.conn.execute("DELETE FROM datasources WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("datasource {}", id)));
        }
        Ok(())
    }

    /// Resolve the active datasource per kind for a job: job-scoped wins
    /// over global, at most one per kind.
    pub fn resolve_datasources(&self, job_id: &str) -> Result<Vec<Datasource>, StoreError> {
        let mut resolved = Vec::new();
        for kind in DatasourceKind::ALL {
            let ds = self
                .conn
                .query_row(
                    "SELECT * FROM datasources WHERE kind = ?1 AND scope_key = ?2",
                    params![kind.as_str(), job_id],
                    row_to_datasource,
                )
                .optional()?;
            let ds = match ds {
                Some(ds) => Some(ds),
                None => self
                    .conn
                    .query_row(
                        "SELECT * FROM datasources WHERE kind = ?1 AND scope_key = ''",
                        params![kind.as_str()],
                        row_to_datasource,
                    )
                    .optional()?,
            };
            if let Some(ds) = ds {
                resolved.push(ds);
            }
        }
        Ok(resolved)
    }

    // === Checkpoints ===

    /// Append a checkpoint row.
    ///
    /// Steps must be strictly increasing per job; rewriting history is a
    /// conflict.
    pub fn append_checkpoint(&self, job_id: &str, step: u32, blob: &str) -> Result<(), StoreError> {
        let last: Option<u32> = self
            .conn
            .query_row(
                "SELECT MAX(step) FROM checkpoints WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        if let Some(last) = last
            && step <= last
        {
            return Err(StoreError::Conflict(format!(
                "checkpoint step {} for job {} is not past the latest step {}",
                step, job_id, last
            )));
        }

        self.conn.execute(
            "INSERT INTO checkpoints (job_id, step, blob, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, step, blob, now_ms()],
        )?;
        debug!(%job_id, step, "append_checkpoint");
        Ok(())
    }

    /// Latest checkpoint for a job, if any
    pub fn latest_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let cp = self
            .conn
            .query_row(
                "SELECT job_id, step, blob, created_at FROM checkpoints
                 WHERE job_id = ?1 ORDER BY step DESC LIMIT 1",
                params![job_id],
                row_to_checkpoint,
            )
            .optional()?;
        Ok(cp)
    }

    pub fn checkpoint_count(&self, job_id: &str) -> Result<u32, StoreError> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn list_checkpoints(&self, job_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, step, blob, created_at FROM checkpoints WHERE job_id = ?1 ORDER BY step",
        )?;
        let rows = stmt.query_map(params![job_id], row_to_checkpoint)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status_str: String = row.get("status")?;
    let autonomy_str: String = row.get("autonomy")?;
    let config_override: String = row.get("config_override")?;

    Ok(Job {
        id: row.get("id")?,
        description: row.get("description")?,
        expert_id: row.get("expert_id")?,
        config_override: serde_json::from_str(&config_override).unwrap_or(serde_json::Value::Null),
        status: status_str.parse::<JobStatus>().unwrap_or(JobStatus::Failed),
        autonomy: autonomy_str.parse::<Autonomy>().unwrap_or(Autonomy::Full),
        worker_url: row.get("worker_url")?,
        phase: row.get("phase")?,
        phase_number: row.get("phase_number")?,
        iteration_count: row.get("iteration_count")?,
        tokens: TokenTotals {
            input_tokens: row.get::<_, i64>("input_tokens")? as u64,
            output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        },
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

fn row_to_datasource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Datasource> {
    let kind_str: String = row.get("kind")?;
    Ok(Datasource {
        id: row.get("id")?,
        kind: kind_str.parse::<DatasourceKind>().unwrap_or(DatasourceKind::Postgresql),
        name: row.get("name")?,
        description: row.get("description")?,
        connection_url: row.get("connection_url")?,
        credentials: row.get("credentials")?,
        read_only: row.get("read_only")?,
        job_id: row.get("job_id")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        job_id: row.get(0)?,
        step: row.get(1)?,
        blob: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn pending_job(store: &Store, id: &str) -> Job {
        let mut job = Job::with_id(id, "task", "default");
        job.status = JobStatus::Pending;
        store.create_job(&job).unwrap();
        job
    }

    #[test]
    fn test_job_crud() {
        let store = store();
        let job = Job::with_id("job-1", "Write a haiku", "default");
        store.create_job(&job).unwrap();

        let loaded = store.get_job("job-1").unwrap().unwrap();
        assert_eq!(loaded.description, "Write a haiku");
        assert_eq!(loaded.status, JobStatus::Created);

        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_status_validates_transitions() {
        let store = store();
        pending_job(&store, "job-1");

        let job = store.update_status("job-1", JobStatus::Assigned, None).unwrap();
        assert_eq!(job.status, JobStatus::Assigned);

        let job = store.update_status("job-1", JobStatus::Running, None).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        // Running -> Pending is illegal
        let err = store.update_status("job-1", JobStatus::Pending, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_status_sets_finished_at() {
        let store = store();
        pending_job(&store, "job-1");
        store.update_status("job-1", JobStatus::Assigned, None).unwrap();
        store.update_status("job-1", JobStatus::Running, None).unwrap();
        let job = store
            .update_status("job-1", JobStatus::Failed, Some("llm unavailable"))
            .unwrap();

        assert!(job.finished_at.is_some());
        assert_eq!(job.error_message.as_deref(), Some("llm unavailable"));
    }

    #[test]
    fn test_claim_next_pending_oldest_first() {
        let mut store = store();
        pending_job(&store, "job-a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        pending_job(&store, "job-b");

        let claimed = store.claim_next_pending("http://worker-1").unwrap().unwrap();
        assert_eq!(claimed.id, "job-a");
        assert_eq!(claimed.status, JobStatus::Assigned);
        assert_eq!(claimed.worker_url.as_deref(), Some("http://worker-1"));

        let claimed = store.claim_next_pending("http://worker-2").unwrap().unwrap();
        assert_eq!(claimed.id, "job-b");

        assert!(store.claim_next_pending("http://worker-3").unwrap().is_none());
    }

    #[test]
    fn test_datasource_uniqueness_per_scope() {
        let store = store();
        let global = Datasource::global(DatasourceKind::Neo4j, "kg", "bolt://a");
        store.create_datasource(&global).unwrap();

        // Second global neo4j binding rejected
        let dup = Datasource::global(DatasourceKind::Neo4j, "kg2", "bolt://b");
        let err = store.create_datasource(&dup).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Job-scoped binding of the same kind is fine
        let scoped = Datasource::scoped(DatasourceKind::Neo4j, "kg3", "bolt://c", "job-1");
        store.create_datasource(&scoped).unwrap();
    }

    #[test]
    fn test_resolve_datasources_scoped_overrides_global() {
        let store = store();
        store
            .create_datasource(&Datasource::global(DatasourceKind::Neo4j, "global-kg", "bolt://global"))
            .unwrap();
        store
            .create_datasource(&Datasource::scoped(
                DatasourceKind::Neo4j,
                "job-kg",
                "bolt://scoped",
                "job-1",
            ))
            .unwrap();
        store
            .create_datasource(&Datasource::global(DatasourceKind::Postgresql, "pg", "postgres://g"))
            .unwrap();

        let resolved = store.resolve_datasources("job-1").unwrap();
        assert_eq!(resolved.len(), 2);

        let neo4j = resolved.iter().find(|d| d.kind == DatasourceKind::Neo4j).unwrap();
        assert_eq!(neo4j.name, "job-kg");

        let pg = resolved.iter().find(|d| d.kind == DatasourceKind::Postgresql).unwrap();
        assert_eq!(pg.name, "pg");

        // A different job sees the globals only
        let other = store.resolve_datasources("job-2").unwrap();
        let neo4j = other.iter().find(|d| d.kind == DatasourceKind::Neo4j).unwrap();
        assert_eq!(neo4j.name, "global-kg");
    }

    #[test]
    fn test_checkpoints_append_only() {
        let store = store();
        store.append_checkpoint("job-1", 1, "{\"a\":1}").unwrap();
        store.append_checkpoint("job-1", 2, "{\"a\":2}").unwrap();

        // Rewriting or going backwards is a conflict
        let err = store.append_checkpoint("job-1", 2, "{}").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.append_checkpoint("job-1", 1, "{}").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let latest = store.latest_checkpoint("job-1").unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(latest.blob, "{\"a\":2}");

        assert_eq!(store.checkpoint_count("job-1").unwrap(), 2);
        assert_eq!(store.checkpoint_count("job-2").unwrap(), 0);
    }

    #[test]
    fn test_record_progress() {
        let store = store();
        pending_job(&store, "job-1");

        let report = StatusReport {
            job_id: "job-1".to_string(),
            status: JobStatus::Running,
            phase: Some("tactical".to_string()),
            phase_number: 2,
            iteration_count: 7,
            tokens: TokenTotals {
                input_tokens: 5000,
                output_tokens: 900,
            },
            error_message: None,
        };
        store.record_progress(&report).unwrap();

        let job = store.get_job_required("job-1").unwrap();
        assert_eq!(job.phase.as_deref(), Some("tactical"));
        assert_eq!(job.phase_number, 2);
        assert_eq!(job.iteration_count, 7);
        assert_eq!(job.tokens.input_tokens, 5000);
    }

    #[test]
    fn test_store_reopen_persists() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("store.db");

        {
            let store = Store::open(&path).unwrap();
            pending_job(&store, "job-durable");
            store.append_checkpoint("job-durable", 1, "{}").unwrap();
        }

        let store = Store::open(&path).unwrap();
        let job = store.get_job_required("job-durable").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(store.checkpoint_count("job-durable").unwrap(), 1);
    }

    #[test]
    fn test_list_jobs_filter() {
        let store = store();
        pending_job(&store, "job-1");
        let done = Job::with_id("job-2", "other", "default");
        store.create_job(&done).unwrap();

        let pending = store.list_jobs(Some(JobStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "job-1");

        let all = store.list_jobs(None).unwrap();
        assert_eq!(all.len(), 2);
    }
}
