//! Todo tools: list_todos, todo_complete, todo_rewind
//!
//! These operate on the live working list in the ToolContext; the engine
//! persists the list to todos.yaml at the node boundary when the dirty
//! signal is set.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::todo::{self, TodoStatus};
use crate::tools::{Tool, ToolContext, ToolResult};

/// Show the current phase's todo list
pub struct ListTodosTool;

#[async_trait]
impl Tool for ListTodosTool {
    fn name(&self) -> &'static str {
        "list_todos"
    }

    fn description(&self) -> &'static str {
        "Show the current phase's todo list with statuses."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn category(&self) -> &'static str {
        "core"
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolResult {
        let todos = ctx.todos.lock().await;
        ToolResult::success(todo::format_for_display(&todos))
    }
}

/// Mark the first open todo done
pub struct TodoCompleteTool;

#[async_trait]
impl Tool for TodoCompleteTool {
    fn name(&self) -> &'static str {
        "todo_complete"
    }

    fn description(&self) -> &'static str {
        "Mark the current (first open) todo as done. Optionally attach notes about the outcome."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "notes": {
                    "type": "string",
                    "description": "Optional outcome notes for the completed todo"
                }
            }
        })
    }

    fn category(&self) -> &'static str {
        "core"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let mut todos = ctx.todos.lock().await;

        let open_idx = todo::first_open(&todos);
        let completion = todo::complete_first_open(&mut todos);

        if let (Some(idx), Some(notes)) = (open_idx, input["notes"].as_str()) {
            todos[idx].notes = Some(notes.to_string());
        }

        if completion.completed.is_some() {
            ctx.signals.lock().await.todos_dirty = true;
        }

        match &completion.completed {
            Some(content) => ToolResult::success(format!(
                "Completed: {}\nRemaining: {}{}",
                content,
                completion.remaining,
                if completion.is_last { " (phase todo list finished)" } else { "" }
            )),
            None => ToolResult::success("All todos were already done. Remaining: 0"),
        }
    }
}

/// Abandon the current todo list and ask for a revised one
pub struct TodoRewindTool;

#[async_trait]
impl Tool for TodoRewindTool {
    fn name(&self) -> &'static str {
        "todo_rewind"
    }

    fn description(&self) -> &'static str {
        "Abandon the current todo list because it no longer fits reality. \
         The list is archived with your issue note; describe the problem clearly."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "issue": {
                    "type": "string",
                    "description": "Why the current list is wrong"
                }
            },
            "required": ["issue"]
        })
    }

    fn category(&self) -> &'static str {
        "core"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(issue) = input["issue"].as_str() else {
            return ToolResult::error("issue is required");
        };

        info!(job_id = %ctx.job_id, issue, "todo_rewind requested");
        ctx.signals.lock().await.rewind = Some(issue.to_string());

        ToolResult::success(
            "Todo list will be archived as abandoned. Provide the revised list with next_phase_todos \
             in the coming strategic pass.",
        )
    }
}

/// Set a specific todo's status (used by the engine for skip flows)
pub struct TodoSetStatusTool;

#[async_trait]
impl Tool for TodoSetStatusTool {
    fn name(&self) -> &'static str {
        "todo_set_status"
    }

    fn description(&self) -> &'static str {
        "Set a todo's status by id (pending, in_progress, done, skipped). Done and skipped are final."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "integer",
                    "description": "Todo id"
                },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "done", "skipped"],
                    "description": "New status"
                },
                "notes": {
                    "type": "string",
                    "description": "Optional notes"
                }
            },
            "required": ["id", "status"]
        })
    }

    fn category(&self) -> &'static str {
        "core"
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(id) = input["id"].as_u64() else {
            return ToolResult::error("id is required");
        };
        let status = match input["status"].as_str() {
            Some("pending") => TodoStatus::Pending,
            Some("in_progress") => TodoStatus::InProgress,
            Some("done") => TodoStatus::Done,
            Some("skipped") => TodoStatus::Skipped,
            Some(other) => return ToolResult::error(format!("Invalid status: {}", other)),
            None => return ToolResult::error("status is required"),
        };
        let notes = input["notes"].as_str().map(String::from);

        let mut todos = ctx.todos.lock().await;
        match todo::set_status(&mut todos, id as usize, status, notes) {
            Ok(()) => {
                ctx.signals.lock().await.todos_dirty = true;
                ToolResult::success(format!("Set todo #{} to {}", id, status))
            }
            Err(e) => ToolResult::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::todo::todos_from_contents;
    use crate::workspace::Workspace;
    use tempfile::tempdir;

    async fn context_with_todos(contents: &[&str]) -> (tempfile::TempDir, ToolContext) {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        let ctx = ToolContext::new(ws, "test");
        let contents: Vec<String> = contents.iter().map(|s| s.to_string()).collect();
        ctx.load_todos(todos_from_contents(&contents)).await;
        (temp, ctx)
    }

    #[tokio::test]
    async fn test_list_todos_display() {
        let (_temp, ctx) = context_with_todos(&["write haiku"]).await;

        let result = ListTodosTool.execute(serde_json::json!({}), &ctx).await;
        assert!(result.content.contains("[ ] #1: write haiku"));
        assert!(result.content.contains("Current task: #1"));
    }

    #[tokio::test]
    async fn test_todo_complete_marks_and_signals() {
        let (_temp, ctx) = context_with_todos(&["a", "b"]).await;

        let result = TodoCompleteTool
            .execute(serde_json::json!({"notes": "went fine"}), &ctx)
            .await;
        assert!(result.content.contains("Completed: a"));
        assert!(result.content.contains("Remaining: 1"));

        let todos = ctx.snapshot_todos().await;
        assert_eq!(todos[0].status, TodoStatus::Done);
        assert_eq!(todos[0].notes.as_deref(), Some("went fine"));

        let signals = ctx.take_signals().await;
        assert!(signals.todos_dirty);
    }

    #[tokio::test]
    async fn test_todo_complete_idempotent_when_done() {
        let (_temp, ctx) = context_with_todos(&["a"]).await;
        TodoCompleteTool.execute(serde_json::json!({}), &ctx).await;
        ctx.take_signals().await;

        let result = TodoCompleteTool.execute(serde_json::json!({}), &ctx).await;
        assert!(!result.is_error);
        assert!(result.content.contains("already done"));
        // No dirty signal for a no-op
        assert!(!ctx.take_signals().await.todos_dirty);
    }

    #[tokio::test]
    async fn test_todo_rewind_signals_issue() {
        let (_temp, ctx) = context_with_todos(&["a"]).await;

        let result = TodoRewindTool
            .execute(serde_json::json!({"issue": "plan assumed wrong schema"}), &ctx)
            .await;
        assert!(!result.is_error);

        let signals = ctx.take_signals().await;
        assert_eq!(signals.rewind.as_deref(), Some("plan assumed wrong schema"));
    }

    #[tokio::test]
    async fn test_todo_set_status_skip() {
        let (_temp, ctx) = context_with_todos(&["a", "b"]).await;

        let result = TodoSetStatusTool
            .execute(serde_json::json!({"id": 1, "status": "skipped", "notes": "obsolete"}), &ctx)
            .await;
        assert!(!result.is_error);

        let todos = ctx.snapshot_todos().await;
        assert_eq!(todos[0].status, TodoStatus::Skipped);
    }
}
