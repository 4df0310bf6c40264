//! Resolved per-job configuration and the layer merge that produces it
//!
//! The orchestrator folds `defaults.yaml ⊕ expert/config.yaml ⊕
//! config_override ⊕ tool override` into one immutable bundle and ships it
//! to the worker inside the JobStart payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Autonomy;

/// Deep-merge `patch` into `base`.
///
/// Objects merge recursively; every other value, including arrays, replaces
/// the base value entirely.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Optional reasoning effort hint passed through to the provider
    pub reasoning: Option<String>,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Retry attempts for transient errors
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.2,
            reasoning: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 120_000,
            max_retries: 5,
        }
    }
}

/// Phase graph tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseSettings {
    /// Minimum todos a next_phase_todos call may produce
    #[serde(rename = "min-todos")]
    pub min_todos: usize,

    /// Maximum todos a next_phase_todos call may produce
    #[serde(rename = "max-todos")]
    pub max_todos: usize,

    /// Iterations allowed per tactical phase before a forced reflection.
    /// 0 disables the limit.
    #[serde(rename = "sprint-limit")]
    pub sprint_limit: u32,

    /// Hard ceiling on total iterations for the whole job
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            min_todos: 5,
            max_todos: 20,
            sprint_limit: 0,
            max_iterations: 500,
        }
    }
}

/// Context-window management thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextSettings {
    /// Recent tool-call/result pairs kept verbatim
    #[serde(rename = "keep-recent-tool-results")]
    pub keep_recent_tool_results: usize,

    /// Older tool results are truncated to this many chars
    #[serde(rename = "max-tool-result-length")]
    pub max_tool_result_length: usize,

    /// At or above this estimate, older tool results become placeholders
    #[serde(rename = "compaction-threshold-tokens")]
    pub compaction_threshold_tokens: usize,

    /// At or above this estimate, everything but the tail is summarized
    #[serde(rename = "summarization-threshold-tokens")]
    pub summarization_threshold_tokens: usize,

    /// Messages kept verbatim when summarizing
    #[serde(rename = "summary-keep-last")]
    pub summary_keep_last: usize,

    /// Tool names whose results are never placeholder-substituted
    #[serde(rename = "protected-tools")]
    pub protected_tools: Vec<String>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            keep_recent_tool_results: 5,
            max_tool_result_length: 5_000,
            compaction_threshold_tokens: 80_000,
            summarization_threshold_tokens: 100_000,
            summary_keep_last: 20,
            protected_tools: vec![
                "read_file".to_string(),
                "list_files".to_string(),
                "list_todos".to_string(),
            ],
        }
    }
}

/// Enabled tool surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSettings {
    /// Enabled tool categories (workspace and core are always present)
    pub categories: Vec<String>,

    /// Extra individual tool names enabled outside their category
    pub tools: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            categories: vec!["workspace".to_string(), "core".to_string()],
            tools: vec![],
        }
    }
}

/// Workspace layout options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Initialize a git repo and commit at phase boundaries
    pub git: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self { git: true }
    }
}

/// Immutable per-job configuration bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolvedConfig {
    pub llm: LlmSettings,
    pub phase: PhaseSettings,
    pub context: ContextSettings,
    pub tools: ToolSettings,
    pub workspace: WorkspaceSettings,
    pub autonomy: Autonomy,

    /// Expert instructions text, written to instructions.md alongside the
    /// job description at workspace init
    pub instructions: String,
}

impl ResolvedConfig {
    /// Fold config layers bottom-up and deserialize the result.
    ///
    /// Later layers win; arrays replace entirely.
    pub fn from_layers(layers: &[Value]) -> Result<Self, serde_json::Error> {
        let mut merged = Value::Object(serde_json::Map::new());
        for layer in layers {
            deep_merge(&mut merged, layer);
        }
        serde_json::from_value(merged)
    }
}
