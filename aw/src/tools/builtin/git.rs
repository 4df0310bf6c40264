//! Read-only git history tools

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

const DEFAULT_LOG_COUNT: usize = 20;

fn no_git() -> ToolResult {
    ToolResult::error("This workspace is not git-backed")
}

/// git log --oneline
pub struct GitLogTool;

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &'static str {
        "git_log"
    }

    fn description(&self) -> &'static str {
        "Show recent workspace history, one commit per line."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "max_count": {
                    "type": "integer",
                    "description": "Number of commits to show (default: 20)"
                }
            }
        })
    }

    fn category(&self) -> &'static str {
        "git"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(git) = &ctx.git else { return no_git() };
        let max_count = input["max_count"].as_u64().unwrap_or(DEFAULT_LOG_COUNT as u64) as usize;

        match git.log(max_count).await {
            Ok(out) if out.trim().is_empty() => ToolResult::success("(no commits)"),
            Ok(out) => ToolResult::success(out),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// git diff
pub struct GitDiffTool;

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &'static str {
        "git_diff"
    }

    fn description(&self) -> &'static str {
        "Show uncommitted workspace changes, or changes against a given revision."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "rev": {
                    "type": "string",
                    "description": "Optional revision to diff against (default: HEAD)"
                }
            }
        })
    }

    fn category(&self) -> &'static str {
        "git"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(git) = &ctx.git else { return no_git() };

        match git.diff(input["rev"].as_str()).await {
            Ok(out) if out.trim().is_empty() => ToolResult::success("(no changes)"),
            Ok(out) => ToolResult::success(out),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// git show
pub struct GitShowTool;

#[async_trait]
impl Tool for GitShowTool {
    fn name(&self) -> &'static str {
        "git_show"
    }

    fn description(&self) -> &'static str {
        "Show a commit: message plus changed-file stats."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "rev": {
                    "type": "string",
                    "description": "Commit hash or ref"
                }
            },
            "required": ["rev"]
        })
    }

    fn category(&self) -> &'static str {
        "git"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(git) = &ctx.git else { return no_git() };
        let Some(rev) = input["rev"].as_str() else {
            return ToolResult::error("rev is required");
        };

        match git.show(rev).await {
            Ok(out) => ToolResult::success(out),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// git status --porcelain
pub struct GitStatusTool;

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &'static str {
        "git_status"
    }

    fn description(&self) -> &'static str {
        "Show uncommitted workspace file states."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn category(&self) -> &'static str {
        "git"
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(git) = &ctx.git else { return no_git() };

        match git.status().await {
            Ok(out) if out.trim().is_empty() => ToolResult::success("(clean)"),
            Ok(out) => ToolResult::success(out),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{GitWorkspace, Workspace};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_git_tools_without_git_backing() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test");

        let result = GitLogTool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.is_error);
        assert!(result.content.contains("not git-backed"));
    }

    #[tokio::test]
    async fn test_git_log_and_status() {
        let git_ok = tokio::process::Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !git_ok {
            return;
        }

        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        ws.write("plan.md", "plan").unwrap();

        let git = GitWorkspace::new(ws.root());
        git.init().await.unwrap();

        let ctx = ToolContext::new(ws.clone(), "test").with_git(git);

        let log = GitLogTool.execute(serde_json::json!({}), &ctx).await;
        assert!(!log.is_error);
        assert!(log.content.contains("workspace init"));

        ws.write("new.txt", "dirty").unwrap();
        let status = GitStatusTool.execute(serde_json::json!({}), &ctx).await;
        assert!(status.content.contains("new.txt"));
    }
}
