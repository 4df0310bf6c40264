//! Tool trait definition

use async_trait::async_trait;
use serde_json::Value;

use super::context::ToolContext;

/// Phases a tool is valid in. The dispatcher only presents tools whose
/// phase tag matches the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    Strategic,
    Tactical,
    Both,
}

impl ToolPhase {
    pub fn allows_strategic(&self) -> bool {
        matches!(self, ToolPhase::Strategic | ToolPhase::Both)
    }

    pub fn allows_tactical(&self) -> bool {
        matches!(self, ToolPhase::Tactical | ToolPhase::Both)
    }
}

/// A tool the LLM can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the tool_use name on the wire)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Category the tool belongs to (workspace, core, git, research, ...)
    fn category(&self) -> &'static str;

    /// Which phases the tool may appear in
    fn phase(&self) -> ToolPhase {
        ToolPhase::Both
    }

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Result of a tool execution.
///
/// Errors are observations, never graph failures: the dispatcher turns
/// them into "Error: ..." text for the model.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Observation text as the model sees it
    pub fn observation(&self) -> String {
        if self.is_error {
            format!("Error: {}", self.content)
        } else {
            self.content.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tags() {
        assert!(ToolPhase::Both.allows_strategic());
        assert!(ToolPhase::Both.allows_tactical());
        assert!(ToolPhase::Strategic.allows_strategic());
        assert!(!ToolPhase::Strategic.allows_tactical());
        assert!(!ToolPhase::Tactical.allows_strategic());
    }

    #[test]
    fn test_observation_prefixes_errors() {
        let ok = ToolResult::success("done");
        assert_eq!(ok.observation(), "done");

        let err = ToolResult::error("file missing");
        assert_eq!(err.observation(), "Error: file missing");
    }
}
