//! OpenAI chat-completions client

use async_trait::async_trait;
use futures::StreamExt;
use jobstore::LlmSettings;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    ChatClient, CompletionRequest, CompletionResponse, ContentBlock, LlmError, Message, MessageContent, Role,
    StopReason, StreamChunk, TokenUsage, ToolCall,
};

/// OpenAI chat client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl OpenAIClient {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let api_key = std::env::var(&settings.api_key_env)
            .map_err(|_| LlmError::Config(format!("Environment variable {} not set", settings.api_key_env)))?;

        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| settings.base_url.clone());

        let http = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: settings.model.clone(),
            api_key,
            base_url,
            http,
            max_tokens: settings.max_tokens,
        })
    }

    /// Convert the layered history to chat-completions form. Tool results
    /// become dedicated `tool` role messages keyed by tool_call_id.
    fn convert_messages(&self, messages: &[Message]) -> Vec<serde_json::Value> {
        let mut out = Vec::new();

        for msg in messages {
            match (&msg.role, &msg.content) {
                (Role::System, content) => {
                    out.push(serde_json::json!({
                        "role": "system",
                        "content": content.as_text().unwrap_or_default(),
                    }));
                }
                (Role::User, MessageContent::Text(text)) => {
                    out.push(serde_json::json!({"role": "user", "content": text}));
                }
                (Role::User, MessageContent::Blocks(blocks)) => {
                    for block in blocks {
                        match block {
                            ContentBlock::ToolResult {
                                tool_use_id, content, ..
                            } => out.push(serde_json::json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            })),
                            ContentBlock::Text { text } => {
                                out.push(serde_json::json!({"role": "user", "content": text}));
                            }
                            ContentBlock::ToolUse { .. } => {}
                        }
                    }
                }
                (Role::Assistant, MessageContent::Text(text)) => {
                    out.push(serde_json::json!({"role": "assistant", "content": text}));
                }
                (Role::Assistant, MessageContent::Blocks(blocks)) => {
                    let mut content: Option<String> = None;
                    let mut tool_calls = Vec::new();
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } => content = Some(text.clone()),
                            ContentBlock::ToolUse { id, name, input } => {
                                tool_calls.push(serde_json::json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": input.to_string(),
                                    },
                                }));
                            }
                            ContentBlock::ToolResult { .. } => {}
                        }
                    }
                    let mut entry = serde_json::json!({"role": "assistant", "content": content});
                    if !tool_calls.is_empty() {
                        entry["tool_calls"] = serde_json::json!(tool_calls);
                    }
                    out.push(entry);
                }
            }
        }

        out
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "temperature": request.temperature,
            "messages": self.convert_messages(&request.messages),
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(
                request.tools.iter().map(|t| t.to_openai_schema()).collect::<Vec<_>>()
            );
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }
}

#[async_trait]
impl ChatClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request, false);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let api_response: ApiResponse = response.json().await?;
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response had no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let input = serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                }
            })
            .collect::<Vec<_>>();

        let stop_reason = if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            StopReason::from_openai(choice.finish_reason.as_deref().unwrap_or("stop"))
        };

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls,
            stop_reason,
            usage: TokenUsage {
                input_tokens: api_response.usage.prompt_tokens,
                output_tokens: api_response.usage.completion_tokens,
                cache_read_tokens: 0,
            },
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request, true);

        let http_request = self.http.post(url).bearer_auth(&self.api_key).json(&body);
        let mut es = EventSource::new(http_request).map_err(|e| LlmError::Decode(e.to_string()))?;

        let mut full_content = String::new();
        // index -> (id, name, arguments_acc)
        let mut partial_tools: Vec<(String, String, String)> = Vec::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                    if let Some(u) = data.get("usage").filter(|u| !u.is_null()) {
                        usage.input_tokens = u["prompt_tokens"].as_u64().unwrap_or(0);
                        usage.output_tokens = u["completion_tokens"].as_u64().unwrap_or(0);
                    }

                    let Some(choice) = data["choices"].get(0) else { continue };

                    if let Some(fr) = choice["finish_reason"].as_str() {
                        stop_reason = StopReason::from_openai(fr);
                    }

                    let delta = &choice["delta"];
                    if let Some(text) = delta["content"].as_str() {
                        full_content.push_str(text);
                        let _ = chunk_tx.send(StreamChunk::TextDelta(text.to_string())).await;
                    }

                    if let Some(tool_deltas) = delta["tool_calls"].as_array() {
                        for td in tool_deltas {
                            let index = td["index"].as_u64().unwrap_or(0) as usize;
                            while partial_tools.len() <= index {
                                partial_tools.push((String::new(), String::new(), String::new()));
                            }
                            let slot = &mut partial_tools[index];
                            if let Some(id) = td["id"].as_str() {
                                slot.0 = id.to_string();
                            }
                            if let Some(name) = td["function"]["name"].as_str() {
                                slot.1 = name.to_string();
                                let _ = chunk_tx
                                    .send(StreamChunk::ToolUseStart {
                                        id: slot.0.clone(),
                                        name: name.to_string(),
                                    })
                                    .await;
                            }
                            if let Some(args) = td["function"]["arguments"].as_str() {
                                slot.2.push_str(args);
                                let _ = chunk_tx
                                    .send(StreamChunk::ToolUseDelta {
                                        id: slot.0.clone(),
                                        json_delta: args.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                }
                Ok(Event::Open) => {}
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    let _ = chunk_tx.send(StreamChunk::Error(e.to_string())).await;
                    return Err(LlmError::Decode(e.to_string()));
                }
            }
        }

        let tool_calls: Vec<ToolCall> = partial_tools
            .into_iter()
            .filter(|(id, _, _)| !id.is_empty())
            .map(|(id, name, args)| {
                let input = serde_json::from_str(&args).unwrap_or(serde_json::json!({}));
                ToolCall { id, name, input }
            })
            .collect();

        if !tool_calls.is_empty() {
            stop_reason = StopReason::ToolUse;
        }

        let _ = chunk_tx.send(StreamChunk::Done { stop_reason, usage }).await;

        Ok(CompletionResponse {
            content: if full_content.is_empty() { None } else { Some(full_content) },
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
