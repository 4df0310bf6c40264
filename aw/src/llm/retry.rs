//! Bounded exponential backoff for transient LLM errors

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::{ChatClient, CompletionRequest, CompletionResponse, LlmError};

/// Retry policy for a completion call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts beyond the first call
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-based), with up to 20% jitter.
    /// Rate-limit errors override this with the provider's hint.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter = rand::rng().random_range(0.0..0.2);
        capped.mul_f64(1.0 + jitter)
    }
}

/// Run a completion, retrying transient failures with backoff.
///
/// Non-retryable errors and exhausted budgets propagate to the caller; the
/// graph then fails the iteration with the checkpoint intact.
pub async fn complete_with_backoff(
    client: &Arc<dyn ChatClient>,
    request: CompletionRequest,
    policy: RetryPolicy,
) -> Result<CompletionResponse, LlmError> {
    let mut attempt = 0u32;

    loop {
        match client.complete(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = err.retry_after().unwrap_or_else(|| policy.delay_for(attempt));
                warn!(%err, attempt, ?delay, "LLM call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StopReason, StreamChunk, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FlakyClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(LlmError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            } else {
                Ok(CompletionResponse {
                    content: Some("ok".to_string()),
                    tool_calls: vec![],
                    stop_reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                })
            }
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            _chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![],
            tools: vec![],
            max_tokens: 10,
            temperature: 0.0,
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let client: Arc<dyn ChatClient> = Arc::new(FlakyClient {
            failures: 2,
            calls: AtomicUsize::new(0),
        });

        let response = complete_with_backoff(&client, request(), fast_policy(3)).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let client: Arc<dyn ChatClient> = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicUsize::new(0),
        });

        let result = complete_with_backoff(&client, request(), fast_policy(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        struct AuthFail;

        #[async_trait]
        impl ChatClient for AuthFail {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
                Err(LlmError::Api {
                    status: 401,
                    message: "bad key".to_string(),
                })
            }

            async fn stream(
                &self,
                request: CompletionRequest,
                _chunk_tx: mpsc::Sender<StreamChunk>,
            ) -> Result<CompletionResponse, LlmError> {
                self.complete(request).await
            }
        }

        let client: Arc<dyn ChatClient> = Arc::new(AuthFail);
        let result = complete_with_backoff(&client, request(), fast_policy(5)).await;
        assert!(matches!(result, Err(LlmError::Api { status: 401, .. })));
    }

    #[test]
    fn test_delay_growth() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };

        // Jitter adds at most 20%
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(1) <= Duration::from_millis(120));
        assert!(policy.delay_for(3) >= Duration::from_millis(400));
        assert!(policy.delay_for(10) <= Duration::from_secs(12));
    }
}
