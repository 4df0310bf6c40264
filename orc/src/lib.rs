//! Orchestrator - owns jobs, resolves config, routes work to workers
//!
//! The orchestrator is the only writer of the jobs and datasources tables.
//! It accepts submissions, folds the per-job config (defaults ⊕ expert ⊕
//! override ⊕ datasource tool override), pairs pending jobs with idle
//! workers, mediates human review, and enforces the wall-clock budget.
//! Workers talk back exclusively through status callbacks.

pub mod assign;
pub mod cli;
pub mod config;
pub mod expert;
pub mod lifecycle;
pub mod resolve;
pub mod server;
pub mod workers;

pub use config::OrchestratorConfig;
pub use expert::{ExpertBundle, load_defaults, load_expert};
pub use lifecycle::Orchestrator;
pub use resolve::resolve_job_config;
pub use workers::{WorkerClient, WorkerError, WorkerPool};
