//! GraphEngine - executes the phase graph
//!
//! A deterministic state machine whose edges depend only on the serialized
//! state: one LLM turn per process node, todo bookkeeping at node
//! boundaries, a checkpoint after every node, and freeze/cancel decisions
//! only between nodes. Given a replayed LLM script the engine produces
//! byte-identical workspace effects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Context, Result, eyre};
use jobstore::{Autonomy, ResolvedConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::context::ContextManager;
use crate::llm::{
    ChatClient, CompletionRequest, ContentBlock, Message, RetryPolicy, complete_with_backoff,
};
use crate::prompts::{CreateTodosContext, FeedbackContext, PromptLoader, SprintExhaustedContext, TransitionContext};
use crate::todo::{self, TodoManager, bootstrap_todos, todos_from_contents};
use crate::tools::{CompletionReport, ToolContext, ToolRegistry};
use crate::workspace::{
    FEEDBACK_FILE, GitWorkspace, INSTRUCTIONS_FILE, MEMORY_FILE, PLAN_FILE, Workspace, WorkspaceError,
};

use super::state::{GraphNode, GraphState, PhaseTransition, PhaseType};

/// How a graph run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// goal_achieved via job_complete, no review required
    Completed(Option<CompletionReport>),
    /// Autonomy gate fired; last checkpoint is authoritative
    Frozen,
    /// Cooperative cancellation at a node boundary
    Cancelled,
    /// Job-level failure (LLM exhaustion, workspace, checkpoint)
    Failed(String),
}

/// Progress snapshot published after every node
#[derive(Debug, Clone)]
pub struct Progress {
    pub phase: PhaseType,
    pub phase_number: u32,
    pub iteration_count: u32,
    pub tokens: jobstore::TokenTotals,
}

/// The engine owning one job's graph execution
pub struct GraphEngine {
    state: GraphState,
    description: String,
    config: ResolvedConfig,
    autonomy: Autonomy,
    llm: Arc<dyn ChatClient>,
    registry: ToolRegistry,
    tool_ctx: ToolContext,
    workspace: Workspace,
    todo_mgr: TodoManager,
    context_mgr: ContextManager,
    prompts: PromptLoader,
    checkpoints: CheckpointStore,
    git: Option<GitWorkspace>,
    cancel: Arc<AtomicBool>,
    progress_tx: Option<watch::Sender<Progress>>,
}

impl GraphEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: GraphState,
        description: String,
        config: ResolvedConfig,
        llm: Arc<dyn ChatClient>,
        registry: ToolRegistry,
        workspace: Workspace,
        checkpoints: CheckpointStore,
    ) -> Self {
        let autonomy = config.autonomy;
        let tool_ctx = ToolContext::new(workspace.clone(), state.job_id.clone())
            .with_todo_window(config.phase.min_todos, config.phase.max_todos);
        let todo_mgr = TodoManager::new(workspace.clone());
        let context_mgr = ContextManager::new(config.context.clone());
        let prompts = PromptLoader::new(workspace.root());

        Self {
            state,
            description,
            config,
            autonomy,
            llm,
            registry,
            tool_ctx,
            workspace,
            todo_mgr,
            context_mgr,
            prompts,
            checkpoints,
            git: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress_tx: None,
        }
    }

    pub fn with_git(mut self, git: GitWorkspace) -> Self {
        self.tool_ctx = self.tool_ctx.clone().with_git(git.clone());
        self.git = Some(git);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: watch::Sender<Progress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    fn publish_progress(&self) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(Progress {
                phase: self.state.current_phase,
                phase_number: self.state.phase_number,
                iteration_count: self.state.iteration_count,
                tokens: self.state.tokens,
            });
        }
    }

    /// Inject resume feedback before re-running a frozen job.
    ///
    /// Approved resumes proceed with the pending transition. Unapproved
    /// resumes with feedback reopen the frozen strategic phase as a
    /// revision so the agent replans before anything advances.
    pub fn apply_resume(&mut self, approved: bool, feedback: Option<&str>) -> Result<()> {
        if let Some(feedback) = feedback {
            let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
            let entry = format!("\n## Review feedback ({})\n\n{}\n", stamp, feedback);
            self.workspace.append(FEEDBACK_FILE, &entry)?;
        }

        let preamble = self.prompts.render(
            "feedback",
            &FeedbackContext {
                approved,
                feedback: feedback.map(String::from),
            },
        )?;
        self.state.messages.push(Message::user(preamble));

        if !approved && self.state.current_phase.is_strategic() {
            self.state.job_complete_called = false;
            self.state.completion = None;
            self.state.pending_todos = None;
            self.state.phase_complete = false;
            self.state.rewound = false;
            // The revised phase must pass the autonomy gate again
            self.state.freeze_cleared = false;

            self.state.todos = feedback_todos();
            self.state.normalize_todo_idx();
            self.todo_mgr.save(&self.state.todos)?;
            self.state.node = GraphNode::Process;
            info!(job_id = %self.state.job_id, "resume: reopening strategic phase for feedback");
        } else {
            info!(job_id = %self.state.job_id, approved, "resume: continuing pending transition");
        }
        Ok(())
    }

    /// Run until completion, freeze, cancellation, or failure
    pub async fn run(&mut self) -> Result<RunOutcome> {
        info!(
            job_id = %self.state.job_id,
            node = ?self.state.node,
            phase = %self.state.current_phase,
            "Graph run starting"
        );

        loop {
            // Node boundaries are the only legal cancellation points
            if self.cancel.load(Ordering::Relaxed) {
                self.checkpoints.save(&mut self.state).await?;
                info!(job_id = %self.state.job_id, "Cancelled at node boundary");
                return Ok(RunOutcome::Cancelled);
            }

            let node = self.state.node;
            debug!(?node, iteration = self.state.iteration_count, "executing node");

            let outcome = match node {
                GraphNode::Init => self.node_init().await?,
                GraphNode::Process => self.node_process().await?,
                GraphNode::UpdateTodos => self.node_update_todos().await?,
                GraphNode::CheckTodos => self.node_check_todos(),
                GraphNode::ArchivePhase => self.node_archive_phase().await?,
                GraphNode::HandleTransition => self.node_handle_transition().await?,
                GraphNode::CreateNextTodos => self.node_create_next_todos()?,
                GraphNode::End => Some(RunOutcome::Completed(self.state.completion.clone())),
            };

            self.checkpoints.save(&mut self.state).await?;
            self.publish_progress();

            if let Some(outcome) = outcome {
                info!(job_id = %self.state.job_id, ?outcome, "Graph run finished");
                return Ok(outcome);
            }
        }
    }

    // === Nodes ===

    /// Seed the workspace and the bootstrap todo list
    async fn node_init(&mut self) -> Result<Option<RunOutcome>> {
        let instructions = if self.config.instructions.is_empty() {
            format!("# Job\n\n{}\n", self.description)
        } else {
            format!("# Job\n\n{}\n\n## Expert instructions\n\n{}\n", self.description, self.config.instructions)
        };

        let mut seeds = vec![
            (INSTRUCTIONS_FILE.to_string(), instructions),
            (MEMORY_FILE.to_string(), String::new()),
            (PLAN_FILE.to_string(), String::new()),
        ];
        seeds.extend(self.registry.doc_files());
        Workspace::init(self.workspace.root(), &seeds)?;

        self.state.todos = bootstrap_todos();
        self.state.normalize_todo_idx();
        retry_once(|| self.todo_mgr.save(&self.state.todos))?;

        if let Some(git) = &self.git {
            git.init().await?;
            let branch = format!("phase-1-{}", PhaseType::Strategic);
            if let Err(e) = git.create_branch(&branch).await {
                warn!(error = %e, "phase branch creation failed");
            } else {
                self.state.git_branch = Some(branch);
            }
        }

        self.state
            .messages
            .push(Message::user("Begin. Read instructions.md and work the todo list shown above."));
        self.state.node = GraphNode::Process;

        info!(job_id = %self.state.job_id, "Initialized workspace and bootstrap todos");
        Ok(None)
    }

    /// One LLM turn: build the layered prompt, call, run tools
    async fn node_process(&mut self) -> Result<Option<RunOutcome>> {
        self.state.phase_transition = PhaseTransition::None;

        // Hard ceiling: force a retrospective note and return control
        if self.state.iteration_count >= self.config.phase.max_iterations {
            let prompt = self.prompts.render(
                "sprint-exhausted",
                &SprintExhaustedContext {
                    max_iterations: self.config.phase.max_iterations,
                },
            )?;
            self.state.messages.push(Message::user(prompt));
            warn!(job_id = %self.state.job_id, "iteration ceiling reached");
            return Ok(Some(RunOutcome::Failed(format!(
                "iteration ceiling ({}) reached",
                self.config.phase.max_iterations
            ))));
        }
        self.state.iteration_count += 1;

        self.context_mgr
            .manage(&mut self.state.messages, &self.llm, &self.prompts)
            .await;

        // Strategic phases read their memory fresh from disk every turn;
        // history loss can never destroy plan knowledge.
        let strategic = self.state.current_phase.is_strategic();
        if strategic {
            self.state.plan = self.workspace.read_or_default(PLAN_FILE, "");
            self.state.workspace_memory = self.workspace.read_or_default(MEMORY_FILE, "");
        }

        // The tool context works on a copy of the todo list; update_todos
        // snapshots it back unconditionally, so it must be fresh even for
        // turns that end up calling no tools.
        self.tool_ctx.load_todos(self.state.todos.clone()).await;

        let overlay = self.context_mgr.build_overlay(
            strategic,
            self.state.phase_number,
            &self.state.todos,
            &self.state.plan,
            &self.state.workspace_memory,
        );

        let mut messages = vec![
            Message::system(self.prompts.system_prompt(strategic)?),
            Message::system(overlay),
        ];
        messages.extend(self.state.messages.iter().cloned());

        let request = CompletionRequest {
            messages,
            tools: self.registry.definitions_for(strategic),
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        };

        let policy = RetryPolicy::with_retries(self.config.llm.max_retries);
        let response = complete_with_backoff(&self.llm, request, policy)
            .await
            .context("LLM call failed after retries")?;

        self.state.tokens.add(response.usage.into_totals());

        let mut blocks = Vec::new();
        if let Some(text) = &response.content {
            blocks.push(ContentBlock::text(text));
        }
        for call in &response.tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        if !blocks.is_empty() {
            self.state.messages.push(Message::assistant_blocks(blocks));
        }

        if !response.tool_calls.is_empty() {
            let results = self
                .registry
                .dispatch_all(&response.tool_calls, strategic, &self.tool_ctx)
                .await;

            let result_blocks: Vec<ContentBlock> = results
                .iter()
                .map(|(id, result)| ContentBlock::tool_result(id, result.observation(), result.is_error))
                .collect();
            self.state.messages.push(Message::user_blocks(result_blocks));
        }

        self.state.node = GraphNode::UpdateTodos;
        Ok(None)
    }

    /// Apply tool-requested todo mutations and terminal signals
    async fn node_update_todos(&mut self) -> Result<Option<RunOutcome>> {
        self.state.todos = self.tool_ctx.snapshot_todos().await;
        let signals = self.tool_ctx.take_signals().await;

        if signals.todos_dirty {
            retry_once(|| self.todo_mgr.save(&self.state.todos))?;
        }

        if let Some(issue) = signals.rewind {
            let phase = self.state.current_phase.as_str();
            let todos = self.state.todos.clone();
            let number = self.state.phase_number;
            retry_once(|| self.todo_mgr.rewind(&todos, number, phase, &issue).map(|_| ()))?;
            self.state.todos.clear();
            self.state.rewound = true;
        }

        if let Some(todos) = signals.next_phase_todos {
            self.state.pending_todos = Some(todos);
        }

        if let Some(report) = signals.job_complete {
            self.state.job_complete_called = true;
            self.state.completion = Some(report);
        }

        self.state.normalize_todo_idx();
        self.state.node = GraphNode::CheckTodos;
        Ok(None)
    }

    /// Evaluate phase completion
    fn node_check_todos(&mut self) -> Option<RunOutcome> {
        let state = &mut self.state;

        if state.current_phase == PhaseType::Tactical && self.config.phase.sprint_limit > 0 {
            let start = state.phase_start_iteration.unwrap_or(state.iteration_count);
            if state.iteration_count.saturating_sub(start) >= self.config.phase.sprint_limit {
                info!(
                    job_id = %state.job_id,
                    sprint_limit = self.config.phase.sprint_limit,
                    "sprint limit reached"
                );
                state.sprint_limit_reached = true;
            }
        }

        state.phase_complete = state.rewound
            || state.job_complete_called
            || state.pending_todos.is_some()
            || state.sprint_limit_reached
            || todo::all_done(&state.todos);

        state.node = if state.phase_complete {
            GraphNode::ArchivePhase
        } else {
            GraphNode::Process
        };
        None
    }

    /// Seal the phase's todos under archive/ and commit the phase branch
    async fn node_archive_phase(&mut self) -> Result<Option<RunOutcome>> {
        if !self.state.rewound && !self.state.todos.is_empty() {
            let retrospective = self.build_retrospective();
            let todos = self.state.todos.clone();
            let number = self.state.phase_number;
            let phase = self.state.current_phase.as_str();
            retry_once(|| self.todo_mgr.archive(&todos, number, phase, &retrospective).map(|_| ()))?;
        }

        if let Some(git) = &self.git {
            git.try_commit_phase(
                self.state.phase_number,
                self.state.current_phase.as_str(),
                "phase archived",
            )
            .await;
            if let Some(branch) = self.state.git_branch.take() {
                let message = format!(
                    "phase {} ({}) complete",
                    self.state.phase_number, self.state.current_phase
                );
                if let Err(e) = async {
                    git.checkout("main").await?;
                    git.squash_merge(&branch, &message).await
                }
                .await
                {
                    warn!(error = %e, branch, "phase merge failed");
                }
            }
        }

        self.state.node = GraphNode::HandleTransition;
        Ok(None)
    }

    fn build_retrospective(&self) -> String {
        let done = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == crate::todo::TodoStatus::Done)
            .count();
        let skipped = self
            .state
            .todos
            .iter()
            .filter(|t| t.status == crate::todo::TodoStatus::Skipped)
            .count();
        let open = self.state.todos.len() - done - skipped;

        let mut retro = format!(
            "# Phase {} ({}) retrospective\n\n- todos done: {}\n- skipped: {}\n- left open: {}\n",
            self.state.phase_number, self.state.current_phase, done, skipped, open
        );
        if self.state.sprint_limit_reached {
            retro.push_str("- ended by sprint limit with work outstanding\n");
        }
        retro
    }

    /// Freeze per autonomy, or flip the phase and emit the entry prompt
    async fn node_handle_transition(&mut self) -> Result<Option<RunOutcome>> {
        let ending = self.state.current_phase;

        if !self.state.freeze_cleared {
            let freeze = if self.state.job_complete_called {
                self.autonomy.review_on_complete()
            } else if ending.is_strategic() {
                self.autonomy.freeze_after_strategic(self.state.phase_number)
            } else {
                self.autonomy.freeze_after_tactical()
            };

            if freeze {
                self.state.freeze_cleared = true;
                info!(
                    job_id = %self.state.job_id,
                    phase = %ending,
                    phase_number = self.state.phase_number,
                    "freezing for review"
                );
                return Ok(Some(RunOutcome::Frozen));
            }
        }
        self.state.freeze_cleared = false;

        if self.state.job_complete_called {
            self.state.goal_achieved = true;
            self.state.node = GraphNode::End;
            return Ok(None);
        }

        // Flip
        let previous_phase = self.state.phase_number;
        self.state.current_phase = ending.flip();
        self.state.phase_number += 1;
        self.state.phase_transition = PhaseTransition::Triggered;
        self.state.phase_complete = false;
        self.state.rewound = false;

        let entering = self.state.current_phase;
        info!(
            job_id = %self.state.job_id,
            phase_number = self.state.phase_number,
            phase = %entering,
            "phase transition"
        );

        if entering.is_strategic() {
            self.state.plan = self.workspace.read_or_default(PLAN_FILE, "");
            self.state.workspace_memory = self.workspace.read_or_default(MEMORY_FILE, "");

            self.state.todos = strategic_todos();
            self.state.normalize_todo_idx();
            retry_once(|| self.todo_mgr.save(&self.state.todos))?;

            let prompt = self.prompts.render(
                "strategic-entry",
                &TransitionContext {
                    phase_number: self.state.phase_number,
                    previous_phase,
                    sprint_limit_reached: self.state.sprint_limit_reached,
                },
            )?;
            // Observable in exactly this transition's prompt, then cleared
            self.state.sprint_limit_reached = false;
            self.state.messages.push(Message::user(prompt));
            self.state.node = GraphNode::CreateNextTodos;
        } else {
            self.state.todos = self.state.pending_todos.take().unwrap_or_default();
            self.state.normalize_todo_idx();
            retry_once(|| self.todo_mgr.save(&self.state.todos))?;
            self.state.phase_start_iteration = Some(self.state.iteration_count);

            let prompt = self.prompts.render(
                "tactical-entry",
                &TransitionContext {
                    phase_number: self.state.phase_number,
                    previous_phase,
                    sprint_limit_reached: false,
                },
            )?;
            self.state.messages.push(Message::user(prompt));
            self.state.node = GraphNode::Process;
        }

        if let Some(git) = &self.git {
            let branch = format!("phase-{}-{}", self.state.phase_number, entering);
            match git.create_branch(&branch).await {
                Ok(()) => self.state.git_branch = Some(branch),
                Err(e) => warn!(error = %e, "phase branch creation failed"),
            }
        }

        self.tool_ctx.load_todos(self.state.todos.clone()).await;
        Ok(None)
    }

    /// Push the explicit next_phase_todos instruction
    fn node_create_next_todos(&mut self) -> Result<Option<RunOutcome>> {
        let prompt = self.prompts.render(
            "create-todos",
            &CreateTodosContext {
                min_todos: self.config.phase.min_todos,
                max_todos: self.config.phase.max_todos,
            },
        )?;
        self.state.messages.push(Message::user(prompt));
        self.state.node = GraphNode::Process;
        Ok(None)
    }
}

/// Standard todo set for strategic phases after the first
fn strategic_todos() -> Vec<crate::todo::Todo> {
    todos_from_contents(&[
        "Review the archived phase outcome and update workspace.md".to_string(),
        "Update plan.md with progress and any replanning".to_string(),
        "Call next_phase_todos(...) for the next phase, or job_complete(...) if the success criteria are met"
            .to_string(),
    ])
}

/// Strategic todo set for a feedback-revision pass
fn feedback_todos() -> Vec<crate::todo::Todo> {
    todos_from_contents(&[
        "Digest the review feedback (see feedback.md)".to_string(),
        "Revise plan.md and workspace.md to address it".to_string(),
        "Call next_phase_todos(...) with revised todos, or job_complete(...) if nothing remains".to_string(),
    ])
}

/// Workspace I/O gets one retry before failing the node
fn retry_once<T>(mut op: impl FnMut() -> Result<T, WorkspaceError>) -> Result<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!(error = %first, "workspace operation failed, retrying once");
            op().map_err(|second| eyre!("workspace operation failed twice: {} / {}", first, second))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategic_todo_sets_fit_shape() {
        let todos = strategic_todos();
        assert_eq!(todos.len(), 3);
        assert!(todos[2].content.contains("next_phase_todos"));

        let todos = feedback_todos();
        assert_eq!(todos.len(), 3);
        assert!(todos[0].content.contains("feedback.md"));
    }

    #[test]
    fn test_retry_once_recovers() {
        let mut calls = 0;
        let result = retry_once(|| {
            calls += 1;
            if calls == 1 {
                Err(WorkspaceError::NotFound {
                    path: "x".to_string(),
                })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_retry_once_gives_up() {
        let result: Result<()> = retry_once(|| {
            Err(WorkspaceError::NotFound {
                path: "x".to_string(),
            })
        });
        assert!(result.is_err());
    }
}
