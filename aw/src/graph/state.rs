//! Graph state - one serializable record
//!
//! Everything the phase graph needs to resume lives in this single struct;
//! checkpointing is one blob write per node. No object graphs, no
//! back-references: inter-entity links are dense integer ids.

use jobstore::TokenTotals;
use serde::{Deserialize, Serialize};

use crate::llm::Message;
use crate::todo::Todo;
use crate::tools::CompletionReport;

/// Phase type; phases strictly alternate starting strategic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    Strategic,
    Tactical,
}

impl PhaseType {
    pub fn flip(&self) -> Self {
        match self {
            PhaseType::Strategic => PhaseType::Tactical,
            PhaseType::Tactical => PhaseType::Strategic,
        }
    }

    pub fn is_strategic(&self) -> bool {
        matches!(self, PhaseType::Strategic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Strategic => "strategic",
            PhaseType::Tactical => "tactical",
        }
    }
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The graph's nodes; the engine re-enters at the stored node on resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Init,
    Process,
    UpdateTodos,
    CheckTodos,
    ArchivePhase,
    HandleTransition,
    CreateNextTodos,
    End,
}

/// Whether a phase boundary was just crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseTransition {
    #[default]
    None,
    Triggered,
}

/// Serialized between every pair of node executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub job_id: String,
    pub node: GraphNode,

    /// Conversation scratch: user/assistant/tool_result messages plus any
    /// summarization artifact. System layers are rebuilt fresh each turn.
    pub messages: Vec<Message>,

    /// Cached plan.md, refreshed from disk at strategic entry
    pub plan: String,
    /// Cached workspace.md, refreshed from disk at strategic entry
    pub workspace_memory: String,

    pub todos: Vec<Todo>,
    pub current_todo_idx: usize,

    pub current_phase: PhaseType,
    pub phase_number: u32,
    /// Set at tactical entry; strategic phases are not sprint-limited
    pub phase_start_iteration: Option<u32>,
    pub iteration_count: u32,

    pub phase_complete: bool,
    pub goal_achieved: bool,
    pub job_complete_called: bool,
    pub sprint_limit_reached: bool,
    pub phase_transition: PhaseTransition,

    /// Todo list staged by next_phase_todos, activated after the
    /// transition into the next tactical phase
    #[serde(default)]
    pub pending_todos: Option<Vec<Todo>>,

    /// The current list was rewound (already archived); skip re-archiving
    #[serde(default)]
    pub rewound: bool,

    /// A freeze at the current boundary has been served; the next
    /// handle_transition pass proceeds with the flip
    #[serde(default)]
    pub freeze_cleared: bool,

    /// job_complete arguments, when called
    #[serde(default)]
    pub completion: Option<CompletionReport>,

    /// Git branch of the phase in progress, when git-backed
    #[serde(default)]
    pub git_branch: Option<String>,

    /// Checkpoint step counter; strictly increasing
    pub step: u32,

    /// Accumulated token usage
    #[serde(default)]
    pub tokens: TokenTotals,
}

impl GraphState {
    /// Fresh state for a new job, positioned at init
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            node: GraphNode::Init,
            messages: Vec::new(),
            plan: String::new(),
            workspace_memory: String::new(),
            todos: Vec::new(),
            current_todo_idx: 0,
            current_phase: PhaseType::Strategic,
            phase_number: 1,
            phase_start_iteration: None,
            iteration_count: 0,
            phase_complete: false,
            goal_achieved: false,
            job_complete_called: false,
            sprint_limit_reached: false,
            phase_transition: PhaseTransition::None,
            pending_todos: None,
            rewound: false,
            freeze_cleared: false,
            completion: None,
            git_branch: None,
            step: 0,
            tokens: TokenTotals::default(),
        }
    }

    /// Serialize for a checkpoint blob
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restore from a checkpoint blob
    pub fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }

    /// First open todo index, clamped to the list length when all done
    pub fn normalize_todo_idx(&mut self) {
        self.current_todo_idx = crate::todo::first_open(&self.todos).unwrap_or(self.todos.len());
    }
}
