//! Todo manager - typed task list with phase metadata
//!
//! The open list lives in `todos.yaml`; phase transitions move it under
//! `archive/phase-N-<type>/` where it becomes immutable. Graph state keeps
//! the working copy in memory and the manager keeps the file in sync.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::workspace::{TODOS_FILE, Workspace, WorkspaceError};

/// Task status; done and skipped are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
}

impl TodoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TodoStatus::Done | TodoStatus::Skipped)
    }

    /// Checkbox marker used in the Layer-2 display
    pub fn marker(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Done => "[x]",
            TodoStatus::Skipped => "[-]",
        }
    }
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Done => "done",
            TodoStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// One tactical or strategic step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    /// Dense 1-based id within the phase
    pub id: usize,
    pub content: String,
    pub status: TodoStatus,
    pub notes: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Todo {
    pub fn new(id: usize, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            status: TodoStatus::Pending,
            notes: None,
            created_at: jobstore::now_ms(),
            completed_at: None,
        }
    }
}

/// Build a dense list from plain content strings
pub fn todos_from_contents(contents: &[String]) -> Vec<Todo> {
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| Todo::new(i + 1, content.clone()))
        .collect()
}

/// The literal strategic bootstrap set every job starts with
pub fn bootstrap_todos() -> Vec<Todo> {
    todos_from_contents(&[
        "Examine the workspace (list files, read instructions.md)".to_string(),
        "Populate workspace.md with current state, key entities, constraints".to_string(),
        "Draft plan.md with phased approach and success criteria".to_string(),
        "Call next_phase_todos(...) to produce the first tactical phase's todos".to_string(),
    ])
}

/// Index of the first non-terminal todo, if any
pub fn first_open(todos: &[Todo]) -> Option<usize> {
    todos.iter().position(|t| !t.status.is_terminal())
}

/// All todos finished (done or skipped)?
pub fn all_done(todos: &[Todo]) -> bool {
    todos.iter().all(|t| t.status.is_terminal())
}

/// Result of a todo_complete call
#[derive(Debug, Clone, Serialize)]
pub struct TodoCompletion {
    /// Content of the todo that was completed, when one was open
    pub completed: Option<String>,
    pub remaining: usize,
    pub is_last: bool,
}

/// Mark the first open todo done.
///
/// Idempotent on a fully-done list: returns remaining=0, is_last=true and
/// mutates nothing.
pub fn complete_first_open(todos: &mut [Todo]) -> TodoCompletion {
    let Some(idx) = first_open(todos) else {
        return TodoCompletion {
            completed: None,
            remaining: 0,
            is_last: true,
        };
    };

    todos[idx].status = TodoStatus::Done;
    todos[idx].completed_at = Some(jobstore::now_ms());
    let completed = todos[idx].content.clone();

    let remaining = todos.iter().filter(|t| !t.status.is_terminal()).count();
    TodoCompletion {
        completed: Some(completed),
        remaining,
        is_last: remaining == 0,
    }
}

/// Set a todo's status by id. Terminal statuses cannot be reopened.
pub fn set_status(todos: &mut [Todo], id: usize, status: TodoStatus, notes: Option<String>) -> Result<(), String> {
    let Some(todo) = todos.iter_mut().find(|t| t.id == id) else {
        return Err(format!("Todo #{} not found", id));
    };
    if todo.status.is_terminal() && !status.is_terminal() {
        return Err(format!("Todo #{} is already {} and cannot be reopened", id, todo.status));
    }
    // At most one in_progress at a time
    if status == TodoStatus::InProgress {
        for other in todos.iter_mut() {
            if other.status == TodoStatus::InProgress {
                other.status = TodoStatus::Pending;
            }
        }
    }
    let todo = todos.iter_mut().find(|t| t.id == id).expect("checked above");
    todo.status = status;
    if status.is_terminal() {
        todo.completed_at = Some(jobstore::now_ms());
    }
    if let Some(notes) = notes {
        todo.notes = Some(notes);
    }
    Ok(())
}

/// Validate a next_phase_todos list against the configured window
pub fn validate_count(count: usize, min: usize, max: usize) -> Result<(), String> {
    if count < min {
        return Err(format!(
            "Only {} todos given; a phase needs at least {}. Break the work into smaller steps.",
            count, min
        ));
    }
    if count > max {
        return Err(format!(
            "{} todos given; a phase allows at most {}. Fold related steps together or defer some to a later phase.",
            count, max
        ));
    }
    Ok(())
}

/// Layer-2 rendered list: one marker line per todo plus the current task
pub fn format_for_display(todos: &[Todo]) -> String {
    if todos.is_empty() {
        return "(no todos)".to_string();
    }

    let mut out = String::new();
    for todo in todos {
        out.push_str(&format!("{} #{}: {}\n", todo.status.marker(), todo.id, todo.content));
        if let Some(notes) = &todo.notes {
            out.push_str(&format!("      note: {}\n", notes));
        }
    }
    match first_open(todos) {
        Some(idx) => out.push_str(&format!("\nCurrent task: #{} - {}", todos[idx].id, todos[idx].content)),
        None => out.push_str("\nAll todos complete."),
    }
    out
}

/// File-backed todo persistence for one workspace
#[derive(Debug, Clone)]
pub struct TodoManager {
    workspace: Workspace,
}

impl TodoManager {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Load the open list; missing file means empty list
    pub fn load(&self) -> Result<Vec<Todo>, WorkspaceError> {
        if !self.workspace.exists(TODOS_FILE) {
            return Ok(vec![]);
        }
        let content = self.workspace.read(TODOS_FILE)?;
        serde_yaml::from_str(&content).map_err(|e| std::io::Error::other(format!("todos.yaml: {}", e)).into())
    }

    pub fn save(&self, todos: &[Todo]) -> Result<(), WorkspaceError> {
        let content = serde_yaml::to_string(todos).map_err(|e| std::io::Error::other(e.to_string()))?;
        self.workspace.write(TODOS_FILE, &content)
    }

    /// Seal the current list under `archive/phase-N-<type>/` and reset the
    /// open list. Appends a retrospective stub alongside the snapshot.
    pub fn archive(
        &self,
        todos: &[Todo],
        phase_number: u32,
        phase_type: &str,
        retrospective: &str,
    ) -> Result<String, WorkspaceError> {
        let dir = self.next_archive_dir(phase_number, phase_type);
        let snapshot = serde_yaml::to_string(todos).map_err(|e| std::io::Error::other(e.to_string()))?;
        self.workspace.write(format!("{}/todos.yaml", dir), &snapshot)?;
        self.workspace
            .write(format!("{}/retrospective.md", dir), retrospective)?;
        self.save(&[])?;
        info!(dir, "Archived phase todos");
        Ok(dir)
    }

    /// Archive the current list as a failed revision with the issue noted;
    /// the caller then creates a revised list.
    pub fn rewind(&self, todos: &[Todo], phase_number: u32, phase_type: &str, issue: &str) -> Result<String, WorkspaceError> {
        let retrospective = format!(
            "# Rewound\n\nThis todo list was abandoned before completion.\n\nIssue: {}\n",
            issue
        );
        self.archive(todos, phase_number, phase_type, &retrospective)
    }

    /// First free archive directory: `phase-N-type`, then `-rev-2`, `-rev-3`...
    fn next_archive_dir(&self, phase_number: u32, phase_type: &str) -> String {
        let base = format!("archive/phase-{}-{}", phase_number, phase_type);
        if !self.workspace.exists(&base) {
            return base;
        }
        let mut rev = 2;
        loop {
            let candidate = format!("{}-rev-{}", base, rev);
            if !self.workspace.exists(&candidate) {
                return candidate;
            }
            rev += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, TodoManager) {
        let temp = tempdir().unwrap();
        let ws = Workspace::init(temp.path().join("job"), &[]).unwrap();
        (temp, TodoManager::new(ws))
    }

    #[test]
    fn test_bootstrap_set_content() {
        let todos = bootstrap_todos();
        assert_eq!(todos.len(), 4);
        assert!(todos[0].content.contains("instructions.md"));
        assert!(todos[1].content.contains("workspace.md"));
        assert!(todos[2].content.contains("plan.md"));
        assert!(todos[3].content.contains("next_phase_todos"));
        // Dense 1-based ids
        for (i, todo) in todos.iter().enumerate() {
            assert_eq!(todo.id, i + 1);
            assert_eq!(todo.status, TodoStatus::Pending);
        }
    }

    #[test]
    fn test_complete_first_open_walks_the_list() {
        let mut todos = todos_from_contents(&["a".to_string(), "b".to_string()]);

        let result = complete_first_open(&mut todos);
        assert_eq!(result.completed.as_deref(), Some("a"));
        assert_eq!(result.remaining, 1);
        assert!(!result.is_last);

        let result = complete_first_open(&mut todos);
        assert_eq!(result.completed.as_deref(), Some("b"));
        assert_eq!(result.remaining, 0);
        assert!(result.is_last);
        assert!(todos[1].completed_at.is_some());
    }

    #[test]
    fn test_complete_on_done_list_is_noop() {
        let mut todos = todos_from_contents(&["a".to_string()]);
        complete_first_open(&mut todos);
        let snapshot = todos.clone();

        let result = complete_first_open(&mut todos);
        assert!(result.completed.is_none());
        assert_eq!(result.remaining, 0);
        assert!(result.is_last);
        assert_eq!(todos[0].completed_at, snapshot[0].completed_at);
    }

    #[test]
    fn test_set_status_terminal_is_final() {
        let mut todos = todos_from_contents(&["a".to_string()]);
        set_status(&mut todos, 1, TodoStatus::Done, None).unwrap();

        let err = set_status(&mut todos, 1, TodoStatus::Pending, None).unwrap_err();
        assert!(err.contains("cannot be reopened"));

        // done -> skipped is still terminal-to-terminal, allowed
        set_status(&mut todos, 1, TodoStatus::Skipped, Some("dup of #2".to_string())).unwrap();
        assert_eq!(todos[0].notes.as_deref(), Some("dup of #2"));
    }

    #[test]
    fn test_set_status_single_in_progress() {
        let mut todos = todos_from_contents(&["a".to_string(), "b".to_string()]);
        set_status(&mut todos, 1, TodoStatus::InProgress, None).unwrap();
        set_status(&mut todos, 2, TodoStatus::InProgress, None).unwrap();

        let in_progress: Vec<_> = todos.iter().filter(|t| t.status == TodoStatus::InProgress).collect();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, 2);
    }

    #[test]
    fn test_set_status_unknown_id() {
        let mut todos = todos_from_contents(&["a".to_string()]);
        let err = set_status(&mut todos, 9, TodoStatus::Done, None).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_validate_count_window() {
        assert!(validate_count(5, 5, 20).is_ok());
        assert!(validate_count(20, 5, 20).is_ok());
        assert!(validate_count(4, 5, 20).is_err());
        assert!(validate_count(21, 5, 20).is_err());
        // The rejection carries a remediation hint
        let err = validate_count(2, 5, 20).unwrap_err();
        assert!(err.contains("smaller steps"));
    }

    #[test]
    fn test_format_for_display() {
        let mut todos = todos_from_contents(&["first".to_string(), "second".to_string()]);
        complete_first_open(&mut todos);

        let display = format_for_display(&todos);
        assert!(display.contains("[x] #1: first"));
        assert!(display.contains("[ ] #2: second"));
        assert!(display.contains("Current task: #2 - second"));
    }

    #[test]
    fn test_format_all_done() {
        let mut todos = todos_from_contents(&["only".to_string()]);
        complete_first_open(&mut todos);
        let display = format_for_display(&todos);
        assert!(display.contains("All todos complete."));
    }

    #[test]
    fn test_load_save_roundtrip() {
        let (_temp, mgr) = manager();
        assert!(mgr.load().unwrap().is_empty());

        let todos = todos_from_contents(&["persist me".to_string()]);
        mgr.save(&todos).unwrap();

        let loaded = mgr.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "persist me");
    }

    #[test]
    fn test_archive_seals_and_resets() {
        let (_temp, mgr) = manager();
        let todos = todos_from_contents(&["a".to_string(), "b".to_string()]);
        mgr.save(&todos).unwrap();

        let dir = mgr.archive(&todos, 1, "strategic", "# Retro\nall good").unwrap();
        assert_eq!(dir, "archive/phase-1-strategic");

        // Open list is reset, archive holds the snapshot
        assert!(mgr.load().unwrap().is_empty());
        let archived: Vec<Todo> =
            serde_yaml::from_str(&mgr.workspace.read("archive/phase-1-strategic/todos.yaml").unwrap()).unwrap();
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn test_rewind_uses_revision_dirs() {
        let (_temp, mgr) = manager();
        let todos = todos_from_contents(&["a".to_string()]);

        let first = mgr.rewind(&todos, 2, "tactical", "wrong approach").unwrap();
        assert_eq!(first, "archive/phase-2-tactical");

        let second = mgr.rewind(&todos, 2, "tactical", "still wrong").unwrap();
        assert_eq!(second, "archive/phase-2-tactical-rev-2");

        let retro = mgr.workspace.read("archive/phase-2-tactical/retrospective.md").unwrap();
        assert!(retro.contains("wrong approach"));
    }

    #[test]
    fn test_first_open_skips_terminal() {
        let mut todos = todos_from_contents(&["a".to_string(), "b".to_string(), "c".to_string()]);
        set_status(&mut todos, 1, TodoStatus::Skipped, None).unwrap();
        assert_eq!(first_open(&todos), Some(1));
        assert!(!all_done(&todos));

        set_status(&mut todos, 2, TodoStatus::Done, None).unwrap();
        set_status(&mut todos, 3, TodoStatus::Done, None).unwrap();
        assert_eq!(first_open(&todos), None);
        assert!(all_done(&todos));
    }
}
