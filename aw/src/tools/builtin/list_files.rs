//! list_files tool

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// List workspace files, optionally filtered by a glob
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files in the workspace, optionally filtered by a glob pattern like output/**/*.md"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Optional glob pattern relative to the workspace root"
                }
            }
        })
    }

    fn category(&self) -> &'static str {
        "workspace"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let pattern = input["pattern"].as_str();

        match ctx.workspace.list(pattern) {
            Ok(files) if files.is_empty() => ToolResult::success("(no files)"),
            Ok(files) => ToolResult::success(files.join("\n")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_list_all_and_filtered() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        ws.write("plan.md", "p").unwrap();
        ws.write("output/x.txt", "x").unwrap();
        let ctx = ToolContext::new(ws, "test");

        let all = ListFilesTool.execute(serde_json::json!({}), &ctx).await;
        assert!(all.content.contains("plan.md"));
        assert!(all.content.contains("output/x.txt"));

        let filtered = ListFilesTool
            .execute(serde_json::json!({"pattern": "*.md"}), &ctx)
            .await;
        assert!(filtered.content.contains("plan.md"));
        assert!(!filtered.content.contains("output/x.txt"));
    }

    #[tokio::test]
    async fn test_list_bad_glob() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test");

        let result = ListFilesTool.execute(serde_json::json!({"pattern": "[["}), &ctx).await;
        assert!(result.is_error);
    }
}
