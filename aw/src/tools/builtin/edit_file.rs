//! edit_file tool - exact-match string replacement

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Replace an exact string in a file
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in a file. Fails if the string is absent or ambiguous; \
         pass replace_all to change every occurrence."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find, including whitespace"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn category(&self) -> &'static str {
        "workspace"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input["path"].as_str() else {
            return ToolResult::error("path is required");
        };
        let Some(old_text) = input["old_text"].as_str() else {
            return ToolResult::error("old_text is required");
        };
        let Some(new_text) = input["new_text"].as_str() else {
            return ToolResult::error("new_text is required");
        };
        let replace_all = input["replace_all"].as_bool().unwrap_or(false);

        match ctx.workspace.edit(path, old_text, new_text, replace_all) {
            Ok(count) => ToolResult::success(format!("Replaced {} occurrence(s) in {}", count, path)),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
