//! Prompt loader
//!
//! Loads templates from workspace overrides or embedded defaults and
//! renders them with Handlebars.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Context for the phase-entry templates
#[derive(Debug, Clone, Serialize)]
pub struct TransitionContext {
    pub phase_number: u32,
    pub previous_phase: u32,
    pub sprint_limit_reached: bool,
}

/// Context for the create-todos instruction
#[derive(Debug, Clone, Serialize)]
pub struct CreateTodosContext {
    pub min_todos: usize,
    pub max_todos: usize,
}

/// Context for the resume-feedback preamble
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackContext {
    pub approved: bool,
    pub feedback: Option<String>,
}

/// Context for the iteration-ceiling reflection
#[derive(Debug, Clone, Serialize)]
pub struct SprintExhaustedContext {
    pub max_iterations: u32,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// Workspace override directory (`.agentworker/prompts/`), when present
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Loader rooted at a workspace; overrides live under
    /// `.agentworker/prompts/<name>.pmt`
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        let override_dir = workspace_root.as_ref().join(".agentworker/prompts");
        Self {
            hbs: Handlebars::new(),
            override_dir: override_dir.exists().then_some(override_dir),
        }
    }

    /// Loader that only sees embedded templates (tests, dev mode)
    pub fn embedded_only() -> Self {
        Self {
            hbs: Handlebars::new(),
            override_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String> {
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "Loading prompt override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt override {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given serializable context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        let template = self.load_template(name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", name, e))
    }

    /// Fetch a template that takes no variables
    pub fn plain(&self, name: &str) -> Result<String> {
        self.load_template(name)
    }

    /// Per-phase system prompt
    pub fn system_prompt(&self, strategic: bool) -> Result<String> {
        self.plain(if strategic { "strategic-system" } else { "tactical-system" })
    }
}
