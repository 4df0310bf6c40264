//! Built-in tool implementations

mod append_file;
pub mod datasource;
mod edit_file;
mod git;
mod list_files;
mod phase;
mod read_file;
pub mod research;
mod search_workspace;
mod todos;
mod write_file;

pub use append_file::AppendFileTool;
pub use datasource::{DatasourceClient, DatasourceTool, UnboundClient, datasource_tools, specs_for};
pub use edit_file::EditFileTool;
pub use git::{GitDiffTool, GitLogTool, GitShowTool, GitStatusTool};
pub use list_files::ListFilesTool;
pub use phase::{JobCompleteTool, NextPhaseTodosTool};
pub use read_file::ReadFileTool;
pub use research::{
    BrowseWebsiteTool, CrawlWebsiteTool, ExtractWebpageTool, MapWebsiteTool, ResearchConfig, WebSearchTool,
};
pub use search_workspace::SearchWorkspaceTool;
pub use todos::{ListTodosTool, TodoCompleteTool, TodoRewindTool, TodoSetStatusTool};
pub use write_file::WriteFileTool;
