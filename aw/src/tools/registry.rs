//! Tool registry and dispatcher
//!
//! One map from name to implementation, filtered three ways before the LLM
//! ever sees a tool: by enabled category (resolved config), by attached
//! datasource (bindings), and by current phase (tags). Dispatch turns every
//! failure into an error observation; nothing below the node boundary is
//! fatal.

use std::collections::HashMap;
use std::sync::Arc;

use jobstore::{DatasourceKind, ResolvedConfig};
use tracing::{debug, info, warn};

use crate::llm::{ToolCall, ToolDefinition};

use super::builtin::{
    AppendFileTool, DatasourceClient, EditFileTool, GitDiffTool, GitLogTool, GitShowTool, GitStatusTool,
    JobCompleteTool, ListFilesTool, ListTodosTool, NextPhaseTodosTool, ReadFileTool, ResearchConfig,
    SearchWorkspaceTool, TodoCompleteTool, TodoRewindTool, TodoSetStatusTool, WriteFileTool, datasource_tools,
};
use super::builtin::research::{BrowseWebsiteTool, CrawlWebsiteTool, ExtractWebpageTool, MapWebsiteTool, WebSearchTool};
use super::{Tool, ToolContext, ToolResult};

/// Description of an attached datasource as the registry needs it
#[derive(Debug, Clone)]
pub struct DatasourceAttachment {
    pub kind: DatasourceKind,
    pub read_only: bool,
}

/// The phase-filtered, config-filtered, datasource-filtered tool surface
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Assemble the registry for one job.
    ///
    /// - workspace and core are always present
    /// - git and research follow the enabled categories (research also
    ///   needs its API key)
    /// - datasource families exist only for actual attachments; drivers
    ///   come from `clients`, falling back to the unbound stub
    /// - citation (or any external engine) binds later via `add_tool`
    pub fn build(
        config: &ResolvedConfig,
        attachments: &[DatasourceAttachment],
        clients: &HashMap<DatasourceKind, Arc<dyn DatasourceClient>>,
    ) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        // Always-on categories
        registry.add_tool(Box::new(ReadFileTool));
        registry.add_tool(Box::new(ListFilesTool));
        registry.add_tool(Box::new(SearchWorkspaceTool));
        registry.add_tool(Box::new(WriteFileTool));
        registry.add_tool(Box::new(AppendFileTool));
        registry.add_tool(Box::new(EditFileTool));

        registry.add_tool(Box::new(ListTodosTool));
        registry.add_tool(Box::new(TodoCompleteTool));
        registry.add_tool(Box::new(TodoRewindTool));
        registry.add_tool(Box::new(TodoSetStatusTool));
        registry.add_tool(Box::new(NextPhaseTodosTool));
        registry.add_tool(Box::new(JobCompleteTool));

        let categories = &config.tools.categories;

        if categories.iter().any(|c| c == "git") {
            registry.add_tool(Box::new(GitLogTool));
            registry.add_tool(Box::new(GitDiffTool));
            registry.add_tool(Box::new(GitShowTool));
            registry.add_tool(Box::new(GitStatusTool));
        }

        if categories.iter().any(|c| c == "research") {
            match ResearchConfig::from_env() {
                Some(research) => {
                    registry.add_tool(Box::new(WebSearchTool::new(research.clone())));
                    registry.add_tool(Box::new(ExtractWebpageTool));
                    registry.add_tool(Box::new(BrowseWebsiteTool));
                    registry.add_tool(Box::new(CrawlWebsiteTool::new(research.clone())));
                    registry.add_tool(Box::new(MapWebsiteTool::new(research)));
                }
                None => {
                    warn!("research category enabled but TAVILY_API_KEY is not set; tools omitted");
                }
            }
        }

        for attachment in attachments {
            let category = attachment.kind.tool_category();
            if !categories.iter().any(|c| c == category) {
                debug!(%category, "attachment present but category disabled; skipping");
                continue;
            }
            let client = clients
                .get(&attachment.kind)
                .cloned()
                .unwrap_or_else(|| Arc::new(super::builtin::UnboundClient::new(attachment.kind)));
            for tool in datasource_tools(client, attachment.read_only) {
                registry.add_tool(tool);
            }
        }

        info!(tool_count = registry.tools.len(), "Tool registry built");
        registry
    }

    /// Empty registry (tests)
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the current phase, sorted by name so prompts are
    /// deterministic
    pub fn definitions_for(&self, strategic: bool) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| {
                if strategic {
                    t.phase().allows_strategic()
                } else {
                    t.phase().allows_tactical()
                }
            })
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one tool call, mapping every failure to an observation
    pub async fn dispatch(&self, call: &ToolCall, strategic: bool, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            let err = super::ToolError::UnknownTool {
                name: call.name.clone(),
            };
            return ToolResult::error(err.to_string());
        };

        let phase_ok = if strategic {
            tool.phase().allows_strategic()
        } else {
            tool.phase().allows_tactical()
        };
        if !phase_ok {
            let err = super::ToolError::WrongPhase {
                name: call.name.clone(),
                phase: if strategic { "strategic" } else { "tactical" }.to_string(),
            };
            return ToolResult::error(err.to_string());
        }

        debug!(tool = call.name, id = %call.id, "dispatch");
        tool.execute(call.input.clone(), ctx).await
    }

    /// Execute a batch of calls in order, pairing each result to its call id
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCall],
        strategic: bool,
        ctx: &ToolContext,
    ) -> Vec<(String, ToolResult)> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.dispatch(call, strategic, ctx).await;
            results.push((call.id.clone(), result));
        }
        results
    }

    /// Per-tool markdown docs, seeded into the workspace `tools/` directory
    pub fn doc_files(&self) -> Vec<(String, String)> {
        let mut docs: Vec<(String, String)> = self
            .tools
            .values()
            .map(|t| {
                let content = format!(
                    "# {}\n\n{}\n\n## Input schema\n\n```json\n{}\n```\n",
                    t.name(),
                    t.description(),
                    serde_json::to_string_pretty(&t.input_schema()).unwrap_or_default(),
                );
                (format!("tools/{}.md", t.name()), content)
            })
            .collect();
        docs.sort();
        docs
    }
}
