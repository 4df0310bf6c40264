//! write_file tool

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Write a file, replacing any existing content
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, fully replacing it. Parent directories are created as needed."
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
                    "description": "Full file content"
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

        match ctx.workspace.write(path, content) {
            Ok(()) => {
                debug!(path, bytes = content.len(), "write_file");
                ToolResult::success(format!("Wrote {} bytes to {}", content.len(), path))
            }
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
    async fn test_write_file() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws.clone(), "test");

        let result = WriteFileTool
            .execute(
                serde_json::json!({"path": "output/haiku.txt", "content": "Waves crest..."}),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        assert_eq!(ws.read("output/haiku.txt").unwrap(), "Waves crest...");
    }

    #[tokio::test]
    async fn test_write_is_idempotent_at_content_level() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws.clone(), "test");

        let input = serde_json::json!({"path": "a.txt", "content": "same"});
        WriteFileTool.execute(input.clone(), &ctx).await;
        WriteFileTool.execute(input, &ctx).await;
        assert_eq!(ws.read("a.txt").unwrap(), "same");
    }

    #[tokio::test]
    async fn test_write_outside_root_rejected() {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test");

        let result = WriteFileTool
            .execute(serde_json::json!({"path": "../escape.txt", "content": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }
}
