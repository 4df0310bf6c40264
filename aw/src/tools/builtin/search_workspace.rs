//! search_workspace tool

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

const DEFAULT_MAX_RESULTS: usize = 50;

/// Regex search across workspace files
pub struct SearchWorkspaceTool;

#[async_trait]
impl Tool for SearchWorkspaceTool {
    fn name(&self) -> &'static str {
        "search_workspace"
    }

    fn description(&self) -> &'static str {
        "Search workspace files for a regex pattern. Returns file, line number, and matching line."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matches to return (default: 50)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn category(&self) -> &'static str {
        "workspace"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(pattern) = input["pattern"].as_str() else {
            return ToolResult::error("pattern is required");
        };
        let max_results = input["max_results"].as_u64().unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;

        match ctx.workspace.search(pattern, max_results) {
            Ok(matches) if matches.is_empty() => ToolResult::success("No matches"),
            Ok(matches) => {
                let lines: Vec<String> = matches
                    .iter()
                    .map(|m| format!("{}:{}: {}", m.path, m.line_number, m.line))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
