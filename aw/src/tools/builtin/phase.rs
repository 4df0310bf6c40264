//! Terminal phase tools: next_phase_todos and job_complete
//!
//! Both exist only during strategic phases. They do not flip graph state
//! themselves; they stage their effect in PhaseSignals and the engine acts
//! at the node boundary.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::todo::{self, todos_from_contents};
use crate::tools::context::CompletionReport;
use crate::tools::{Tool, ToolContext, ToolPhase, ToolResult};

/// Produce the next tactical phase's todo list
pub struct NextPhaseTodosTool;

#[async_trait]
impl Tool for NextPhaseTodosTool {
    fn name(&self) -> &'static str {
        "next_phase_todos"
    }

    fn description(&self) -> &'static str {
        "Finish this strategic phase by defining the next tactical phase's todo list. \
         Items must be concrete and independently completable, in dependency order."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {
                                "type": "string",
                                "description": "What this step accomplishes"
                            }
                        },
                        "required": ["content"]
                    },
                    "description": "Ordered todo list for the next tactical phase"
                }
            },
            "required": ["todos"]
        })
    }

    fn category(&self) -> &'static str {
        "core"
    }

    fn phase(&self) -> ToolPhase {
        ToolPhase::Strategic
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(items) = input["todos"].as_array() else {
            return ToolResult::error("todos is required and must be an array");
        };

        let mut contents = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item["content"].as_str() {
                Some(content) if !content.trim().is_empty() => contents.push(content.trim().to_string()),
                _ => return ToolResult::error(format!("todos[{}] is missing non-empty content", i)),
            }
        }

        if let Err(hint) = todo::validate_count(contents.len(), ctx.min_todos, ctx.max_todos) {
            return ToolResult::error(hint);
        }

        let todos = todos_from_contents(&contents);
        let count = todos.len();
        ctx.signals.lock().await.next_phase_todos = Some(todos);

        info!(job_id = %ctx.job_id, count, "next_phase_todos staged");
        ToolResult::success(format!(
            "Accepted {} todos for the next tactical phase. This strategic phase is complete.",
            count
        ))
    }
}

/// Self-report job completion
pub struct JobCompleteTool;

#[async_trait]
impl Tool for JobCompleteTool {
    fn name(&self) -> &'static str {
        "job_complete"
    }

    fn description(&self) -> &'static str {
        "Declare the job finished. Only call when every success criterion in plan.md is met \
         and all deliverables are in the workspace."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished"
                },
                "deliverables": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace paths of the deliverables"
                },
                "confidence": {
                    "type": "number",
                    "description": "Confidence the success criteria are met, 0.0 to 1.0"
                },
                "notes": {
                    "type": "string",
                    "description": "Optional caveats for the reviewer"
                }
            },
            "required": ["summary", "confidence"]
        })
    }

    fn category(&self) -> &'static str {
        "core"
    }

    fn phase(&self) -> ToolPhase {
        ToolPhase::Strategic
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(summary) = input["summary"].as_str() else {
            return ToolResult::error("summary is required");
        };
        let Some(confidence) = input["confidence"].as_f64() else {
            return ToolResult::error("confidence is required");
        };
        if !(0.0..=1.0).contains(&confidence) {
            return ToolResult::error("confidence must be between 0.0 and 1.0");
        }

        let deliverables: Vec<String> = input["deliverables"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let report = CompletionReport {
            summary: summary.to_string(),
            deliverables: deliverables.clone(),
            confidence,
            notes: input["notes"].as_str().map(String::from),
        };

        info!(job_id = %ctx.job_id, confidence, ?deliverables, "job_complete called");
        ctx.signals.lock().await.job_complete = Some(report);

        ToolResult::success("Completion recorded. The job will finish or enter review per its autonomy level.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use tempfile::tempdir;

    fn context() -> (tempfile::TempDir, ToolContext) {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test").with_todo_window(2, 4);
        (temp, ctx)
    }

    #[tokio::test]
    async fn test_next_phase_todos_stages_list() {
        let (_temp, ctx) = context();

        let result = NextPhaseTodosTool
            .execute(
                serde_json::json!({"todos": [
                    {"content": "step one"},
                    {"content": "step two"},
                ]}),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        let signals = ctx.take_signals().await;
        let staged = signals.next_phase_todos.unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].id, 1);
        assert_eq!(staged[1].content, "step two");
    }

    #[tokio::test]
    async fn test_next_phase_todos_rejects_out_of_window() {
        let (_temp, ctx) = context();

        // Too few
        let result = NextPhaseTodosTool
            .execute(serde_json::json!({"todos": [{"content": "only one"}]}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("at least 2"));

        // Too many
        let many: Vec<Value> = (0..5).map(|i| serde_json::json!({"content": format!("t{}", i)})).collect();
        let result = NextPhaseTodosTool
            .execute(serde_json::json!({"todos": many}), &ctx)
            .await;
        assert!(result.is_error);

        // Nothing staged after rejections
        assert!(ctx.take_signals().await.next_phase_todos.is_none());
    }

    #[tokio::test]
    async fn test_next_phase_todos_rejects_empty_content() {
        let (_temp, ctx) = context();
        let result = NextPhaseTodosTool
            .execute(serde_json::json!({"todos": [{"content": "ok"}, {"content": "  "}]}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("todos[1]"));
    }

    #[tokio::test]
    async fn test_job_complete_stages_report() {
        let (_temp, ctx) = context();

        let result = JobCompleteTool
            .execute(
                serde_json::json!({
                    "summary": "done",
                    "deliverables": ["output/haiku.txt"],
                    "confidence": 1.0,
                }),
                &ctx,
            )
            .await;

        assert!(!result.is_error);
        let report = ctx.take_signals().await.job_complete.unwrap();
        assert_eq!(report.summary, "done");
        assert_eq!(report.deliverables, vec!["output/haiku.txt"]);
        assert_eq!(report.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_job_complete_validates_confidence() {
        let (_temp, ctx) = context();
        let result = JobCompleteTool
            .execute(serde_json::json!({"summary": "done", "confidence": 1.5}), &ctx)
            .await;
        assert!(result.is_error);
    }

    #[test]
    fn test_terminal_tools_are_strategic_only() {
        assert_eq!(NextPhaseTodosTool.phase(), ToolPhase::Strategic);
        assert_eq!(JobCompleteTool.phase(), ToolPhase::Strategic);
    }
}
