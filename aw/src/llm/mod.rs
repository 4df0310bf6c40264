//! LLM chat interface for the agent worker
//!
//! One trait, two providers, a scripted mock for tests, and a backoff
//! helper. Provider selection is by resolved config, with the model-name
//! prefix as a fallback heuristic.

use std::sync::Arc;

use jobstore::LlmSettings;
use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod openai;
pub mod retry;
mod types;

pub use anthropic::AnthropicClient;
pub use client::ChatClient;
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use retry::{RetryPolicy, complete_with_backoff};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, StreamChunk,
    TokenUsage, ToolCall, ToolDefinition,
};

/// Build a chat client from resolved LLM settings.
///
/// An empty provider falls back to a model-name prefix heuristic
/// ("claude-*" means Anthropic, "gpt-*"/"o*" means OpenAI).
pub fn create_client(settings: &LlmSettings) -> Result<Arc<dyn ChatClient>, LlmError> {
    let provider = if settings.provider.is_empty() {
        if settings.model.starts_with("claude") { "anthropic" } else { "openai" }
    } else {
        settings.provider.as_str()
    };
    debug!(provider, model = %settings.model, "create_client");

    match provider {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_settings(settings)?)),
        "openai" => Ok(Arc::new(OpenAIClient::from_settings(settings)?)),
        other => Err(LlmError::Config(format!(
            "Unknown LLM provider: '{}'. Supported: anthropic, openai",
            other
        ))),
    }
}
