//! Worker pool - HTTP clients for the agent workers

use std::time::Duration;

use jobstore::{CancelRequest, JobResume, JobStart, WorkerStatus};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from worker dispatch
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker is busy")]
    Busy,

    #[error("Worker rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Worker unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
}

impl WorkerError {
    /// Rejections (4xx) mean the payload is at fault; unreachable or busy
    /// workers just mean "try another worker or try later".
    pub fn is_payload_fault(&self) -> bool {
        matches!(self, WorkerError::Rejected { status, .. } if *status != 409 && *status < 500)
    }
}

/// HTTP client for one worker
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> Result<WorkerStatus, WorkerError> {
        let response = self.http.get(format!("{}/status", self.base_url)).send().await?;
        if !response.status().is_success() {
            return Err(WorkerError::Rejected {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    async fn post_expecting_accepted<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<(), WorkerError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            202 => Ok(()),
            409 => Err(WorkerError::Busy),
            _ => Err(WorkerError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn start(&self, payload: &JobStart) -> Result<(), WorkerError> {
        debug!(worker = %self.base_url, job_id = %payload.job_id, "dispatching start");
        self.post_expecting_accepted("/start", payload).await
    }

    pub async fn resume(&self, payload: &JobResume) -> Result<(), WorkerError> {
        debug!(worker = %self.base_url, job_id = %payload.job_id, "dispatching resume");
        self.post_expecting_accepted("/resume", payload).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), WorkerError> {
        let payload = CancelRequest {
            job_id: job_id.to_string(),
        };
        self.post_expecting_accepted("/cancel", &payload).await
    }
}

/// Static pool of workers from config
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    workers: Vec<WorkerClient>,
}

impl WorkerPool {
    pub fn new(urls: &[String]) -> Self {
        Self {
            workers: urls.iter().map(WorkerClient::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Find the worker that currently holds a job, by its stored URL
    pub fn by_url(&self, url: &str) -> Option<&WorkerClient> {
        let url = url.trim_end_matches('/');
        self.workers.iter().find(|w| w.base_url() == url)
    }

    /// First worker reporting idle. Unreachable workers are skipped with a
    /// warning; they get polled again next tick.
    pub async fn find_idle(&self) -> Option<&WorkerClient> {
        for worker in &self.workers {
            match worker.status().await {
                Ok(status) if !status.busy => return Some(worker),
                Ok(_) => {}
                Err(e) => {
                    warn!(worker = %worker.base_url(), error = %e, "worker status check failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = WorkerClient::new("http://worker-1:8090/");
        assert_eq!(client.base_url(), "http://worker-1:8090");
    }

    #[test]
    fn test_pool_by_url() {
        let pool = WorkerPool::new(&["http://a:1".to_string(), "http://b:2".to_string()]);
        assert_eq!(pool.len(), 2);
        assert!(pool.by_url("http://b:2/").is_some());
        assert!(pool.by_url("http://c:3").is_none());
    }

    #[test]
    fn test_payload_fault_classification() {
        assert!(
            WorkerError::Rejected {
                status: 400,
                body: String::new()
            }
            .is_payload_fault()
        );
        assert!(
            WorkerError::Rejected {
                status: 422,
                body: String::new()
            }
            .is_payload_fault()
        );
        assert!(
            !WorkerError::Rejected {
                status: 500,
                body: String::new()
            }
            .is_payload_fault()
        );
        assert!(!WorkerError::Busy.is_payload_fault());
    }

    #[tokio::test]
    async fn test_find_idle_against_stub_server() {
        // Minimal stub worker answering /status
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new().route(
            "/status",
            axum::routing::get(|| async {
                axum::Json(WorkerStatus::idle())
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let pool = WorkerPool::new(&[format!("http://{}", addr)]);
        let idle = pool.find_idle().await;
        assert!(idle.is_some());
    }
}
