//! Context manager - keeps the chat history inside the LLM's budget
//!
//! The workspace files are the durable memory; everything here is an
//! optimization, not a correctness requirement. plan.md and workspace.md
//! are re-read from disk for the overlay, so trimming history never
//! destroys plan knowledge.
//!
//! Prompt layers, top to bottom:
//! 1. persistent system prompt (per phase type)
//! 2. Layer-2 overlay: todo list + phase indicator + current task,
//!    injected as a system message every turn, never trimmed
//! 3. tool schemas (provider-side)
//! 4. previous summary (an assistant message left by summarization)
//! 5. recent conversation

use std::collections::HashMap;
use std::sync::Arc;

use jobstore::ContextSettings;
use tracing::{debug, info, warn};

use crate::llm::{ChatClient, CompletionRequest, ContentBlock, Message, MessageContent, Role};
use crate::prompts::PromptLoader;
use crate::todo::{self, Todo};

/// Substituted for aged-out tool results during compaction
pub const RESULT_PLACEHOLDER: &str = "[Result processed - see workspace if needed]";

/// Marker prefix for the summary message so later passes can recognize it
const SUMMARY_PREFIX: &str = "[Summary of earlier work]";

/// Rough token estimate: four characters per token
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.char_len() / 4).sum()
}

/// Truncate in place without splitting a UTF-8 character
fn truncate_at_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// Context-window management for one job
#[derive(Debug, Clone)]
pub struct ContextManager {
    settings: ContextSettings,
}

impl ContextManager {
    pub fn new(settings: ContextSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Layer-2 overlay: phase indicator, fresh plan/memory, and the
    /// rendered todo list with the current-task instruction.
    pub fn build_overlay(
        &self,
        strategic: bool,
        phase_number: u32,
        todos: &[Todo],
        plan: &str,
        memory: &str,
    ) -> String {
        let phase_label = if strategic { "STRATEGIC" } else { "TACTICAL" };
        let mut overlay = format!("== Phase {} ({}) ==\n\n", phase_number, phase_label);

        if strategic {
            overlay.push_str("## plan.md (current)\n\n");
            overlay.push_str(if plan.is_empty() { "(empty)" } else { plan });
            overlay.push_str("\n\n## workspace.md (current)\n\n");
            overlay.push_str(if memory.is_empty() { "(empty)" } else { memory });
            overlay.push_str("\n\n");
        }

        overlay.push_str("## Todo list\n\n");
        overlay.push_str(&todo::format_for_display(todos));
        overlay
    }

    /// Map tool_use_id -> tool name from the assistant messages
    fn tool_name_index(messages: &[Message]) -> HashMap<String, String> {
        let mut index = HashMap::new();
        for msg in messages {
            if msg.role != Role::Assistant {
                continue;
            }
            if let MessageContent::Blocks(blocks) = &msg.content {
                for block in blocks {
                    if let ContentBlock::ToolUse { id, name, .. } = block {
                        index.insert(id.clone(), name.clone());
                    }
                }
            }
        }
        index
    }

    /// Indexes of user messages carrying tool results, oldest first
    fn tool_result_message_indexes(messages: &[Message]) -> Vec<usize> {
        messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User && !m.tool_results().is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Truncate tool results older than the keep-recent window
    pub fn age_tool_results(&self, messages: &mut [Message]) -> usize {
        let indexes = Self::tool_result_message_indexes(messages);
        let keep = self.settings.keep_recent_tool_results;
        if indexes.len() <= keep {
            return 0;
        }

        let max_len = self.settings.max_tool_result_length;
        let mut truncated = 0;
        for &idx in &indexes[..indexes.len() - keep] {
            if let MessageContent::Blocks(blocks) = &mut messages[idx].content {
                for block in blocks {
                    if let ContentBlock::ToolResult { content, .. } = block
                        && content.len() > max_len
                    {
                        truncate_at_boundary(content, max_len);
                        content.push_str("\n[truncated]");
                        truncated += 1;
                    }
                }
            }
        }
        if truncated > 0 {
            debug!(truncated, "aged tool results");
        }
        truncated
    }

    /// Replace old tool results with the placeholder, protected tools
    /// excepted. Applied at or above the compaction threshold.
    pub fn compact(&self, messages: &mut [Message]) -> usize {
        let name_index = Self::tool_name_index(messages);
        let indexes = Self::tool_result_message_indexes(messages);
        let keep = self.settings.keep_recent_tool_results;
        if indexes.len() <= keep {
            return 0;
        }

        let mut replaced = 0;
        for &idx in &indexes[..indexes.len() - keep] {
            if let MessageContent::Blocks(blocks) = &mut messages[idx].content {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id, content, ..
                    } = block
                    {
                        let tool_name = name_index.get(tool_use_id).map(String::as_str).unwrap_or("");
                        let protected = self.settings.protected_tools.iter().any(|p| p == tool_name);
                        if !protected && content.as_str() != RESULT_PLACEHOLDER {
                            *content = RESULT_PLACEHOLDER.to_string();
                            replaced += 1;
                        }
                    }
                }
            }
        }
        if replaced > 0 {
            info!(replaced, "compacted tool results");
        }
        replaced
    }

    /// Render messages into a plain transcript for the summarizer
    fn render_transcript(messages: &[Message]) -> String {
        let mut out = String::new();
        for msg in messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            match &msg.content {
                MessageContent::Text(text) => {
                    out.push_str(&format!("{}: {}\n", role, text));
                }
                MessageContent::Blocks(blocks) => {
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => out.push_str(&format!("{}: {}\n", role, text)),
                            ContentBlock::ToolUse { name, input, .. } => {
                                out.push_str(&format!("{} -> {}({})\n", role, name, input));
                            }
                            ContentBlock::ToolResult { content, is_error, .. } => {
                                let tag = if *is_error { "tool error" } else { "tool result" };
                                out.push_str(&format!("{}: {}\n", tag, content));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Summarize everything but the last K messages into one assistant
    /// message. Best-effort: an LLM failure leaves the history unchanged.
    pub async fn summarize(
        &self,
        messages: &mut Vec<Message>,
        llm: &Arc<dyn ChatClient>,
        prompts: &PromptLoader,
    ) -> bool {
        let keep = self.settings.summary_keep_last;
        if messages.len() <= keep {
            return false;
        }

        let head: Vec<Message> = messages[..messages.len() - keep].to_vec();
        let transcript = Self::render_transcript(&head);

        let system = match prompts.plain("summarize") {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "summarize prompt unavailable");
                return false;
            }
        };

        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(transcript)],
            tools: vec![],
            max_tokens: 4096,
            temperature: 0.0,
        };

        match llm.complete(request).await {
            Ok(response) => {
                let summary_text = response.content.unwrap_or_default();
                let summary = Message::assistant(format!("{}\n{}", SUMMARY_PREFIX, summary_text));
                let tail: Vec<Message> = messages[messages.len() - keep..].to_vec();
                messages.clear();
                messages.push(summary);
                messages.extend(tail);
                info!(kept = keep, "summarized history");
                true
            }
            Err(e) => {
                warn!(error = %e, "summarization failed; keeping full history");
                false
            }
        }
    }

    /// Apply the whole discipline for one turn: aging always, compaction
    /// and summarization by threshold. Returns the final token estimate.
    pub async fn manage(
        &self,
        messages: &mut Vec<Message>,
        llm: &Arc<dyn ChatClient>,
        prompts: &PromptLoader,
    ) -> usize {
        self.age_tool_results(messages);

        let mut tokens = estimate_tokens(messages);
        if tokens >= self.settings.compaction_threshold_tokens {
            self.compact(messages);
            tokens = estimate_tokens(messages);
        }
        if tokens >= self.settings.summarization_threshold_tokens {
            self.summarize(messages, llm, prompts).await;
            tokens = estimate_tokens(messages);
        }
        tokens
    }
}
