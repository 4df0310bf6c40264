//! ChatClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Provider-agnostic chat interface.
///
/// Each call is self-contained: the request carries the full layered
/// history, so the client keeps no conversation state. Tool-call semantics
/// (request/response correlation ids) ride on the message types.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// One blocking completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion; chunks are sent as they arrive and the final
    /// assembled response is returned.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client replaying a prerecorded response sequence.
    ///
    /// The graph is deterministic given LLM output, so replaying the same
    /// script must yield byte-identical workspace effects.
    pub struct ScriptedClient {
        responses: Vec<CompletionResponse>,
        call_count: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses,
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests seen so far (for asserting on prompt layering)
        pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::Decode("script exhausted".to_string()))
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            _chunk_tx: tokio::sync::mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn request() -> CompletionRequest {
            CompletionRequest {
                messages: vec![],
                tools: vec![],
                max_tokens: 100,
                temperature: 0.0,
            }
        }

        #[tokio::test]
        async fn test_scripted_client_replays_in_order() {
            let client = ScriptedClient::new(vec![
                CompletionResponse::text("first"),
                CompletionResponse::text("second"),
            ]);

            let r1 = client.complete(request()).await.unwrap();
            assert_eq!(r1.content.as_deref(), Some("first"));

            let r2 = client.complete(request()).await.unwrap();
            assert_eq!(r2.content.as_deref(), Some("second"));

            assert_eq!(client.call_count(), 2);
        }

        #[tokio::test]
        async fn test_scripted_client_errors_when_exhausted() {
            let client = ScriptedClient::new(vec![]);
            let result = client.complete(request()).await;
            assert!(result.is_err());
        }
    }
}
