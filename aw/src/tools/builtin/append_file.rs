//! append_to_file tool

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Append content to a file under the workspace file lock
pub struct AppendFileTool;

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &'static str {
        "append_to_file"
    }

    fn description(&self) -> &'static str {
        "Append content to the end of a file, creating it if missing. \
         Good for logs and running notes like workspace.md."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Content to append"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> &'static str {
        "workspace"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input["path"].as_str() else {
            return ToolResult::error("path is required");
        };
        let Some(content) = input["content"].as_str() else {
            return ToolResult::error("content is required");
        };

        match ctx.workspace.append(path, content) {
            Ok(()) => ToolResult::success(format!("Appended {} bytes to {}", content.len(), path)),
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
    async fn test_append_creates_and_extends() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws.clone(), "test");

        AppendFileTool
            .execute(serde_json::json!({"path": "workspace.md", "content": "## Note\n"}), &ctx)
            .await;
        AppendFileTool
            .execute(serde_json::json!({"path": "workspace.md", "content": "more\n"}), &ctx)
            .await;

        assert_eq!(ws.read("workspace.md").unwrap(), "## Note\nmore\n");
    }
}
