//! Tool error types

use thiserror::Error;

/// Errors from tool dispatch and execution.
///
/// These never escape the dispatcher as graph failures; they become
/// error observations for the agent.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool {name} is not available in the {phase} phase")]
    WrongPhase { name: String, phase: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Workspace error: {0}")]
    Workspace(#[from] crate::workspace::WorkspaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_message() {
        let err = ToolError::UnknownTool {
            name: "execute_cypher_query".to_string(),
        };
        assert!(err.to_string().contains("execute_cypher_query"));
    }

    #[test]
    fn test_wrong_phase_message() {
        let err = ToolError::WrongPhase {
            name: "next_phase_todos".to_string(),
            phase: "tactical".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("next_phase_todos"));
        assert!(msg.contains("tactical"));
    }
}
