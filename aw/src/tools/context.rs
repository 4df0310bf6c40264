//! ToolContext - execution context shared by all tools of one job
//!
//! Tools never touch graph state directly. Terminal tools record their
//! effect in [`PhaseSignals`]; the engine's update_todos node reads the
//! signals back at the node boundary. That keeps the graph deterministic:
//! edges depend only on serialized state, and tools stay pure observers
//! plus a signal mailbox.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::todo::Todo;
use crate::workspace::{GitWorkspace, Workspace};

/// job_complete arguments, carried through to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub summary: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    pub confidence: f64,
    pub notes: Option<String>,
}

/// Effects requested by tools during one process turn
#[derive(Debug, Default)]
pub struct PhaseSignals {
    /// Todo list for the next tactical phase, staged by next_phase_todos
    pub next_phase_todos: Option<Vec<Todo>>,

    /// Set when job_complete was called
    pub job_complete: Option<CompletionReport>,

    /// Issue text from todo_rewind; the engine archives and expects a
    /// revised list
    pub rewind: Option<String>,

    /// The working todo list was mutated and needs persisting
    pub todos_dirty: bool,
}

impl PhaseSignals {
    pub fn clear(&mut self) {
        *self = PhaseSignals::default();
    }
}

/// Execution context for tools - scoped to a single job
#[derive(Clone)]
pub struct ToolContext {
    /// The job's sandboxed workspace
    pub workspace: Workspace,

    /// Git history helper, when the workspace is git-backed
    pub git: Option<GitWorkspace>,

    pub job_id: String,

    /// Live working todo list for the current phase
    pub todos: Arc<Mutex<Vec<Todo>>>,

    /// Terminal-tool effect mailbox, drained by the engine each turn
    pub signals: Arc<Mutex<PhaseSignals>>,

    /// Todo-count window enforced by next_phase_todos
    pub min_todos: usize,
    pub max_todos: usize,
}

impl ToolContext {
    pub fn new(workspace: Workspace, job_id: impl Into<String>) -> Self {
        Self {
            workspace,
            git: None,
            job_id: job_id.into(),
            todos: Arc::new(Mutex::new(Vec::new())),
            signals: Arc::new(Mutex::new(PhaseSignals::default())),
            min_todos: 5,
            max_todos: 20,
        }
    }

    pub fn with_git(mut self, git: GitWorkspace) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_todo_window(mut self, min: usize, max: usize) -> Self {
        self.min_todos = min;
        self.max_todos = max;
        self
    }

    /// Replace the working todo list (engine, at turn start)
    pub async fn load_todos(&self, todos: Vec<Todo>) {
        *self.todos.lock().await = todos;
    }

    /// Snapshot the working todo list (engine, at turn end)
    pub async fn snapshot_todos(&self) -> Vec<Todo> {
        self.todos.lock().await.clone()
    }

    /// Drain the signal mailbox (engine, at turn end)
    pub async fn take_signals(&self) -> PhaseSignals {
        let mut signals = self.signals.lock().await;
        std::mem::take(&mut *signals)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("job_id", &self.job_id)
            .field("workspace", &self.workspace.root())
            .finish()
    }
}
