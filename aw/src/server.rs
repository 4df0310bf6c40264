//! Worker HTTP server - the orchestrator-facing control surface

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use eyre::Result;
use jobstore::{CancelRequest, JobResume, JobStart, StoreHandle, WorkerStatus};
use serde_json::json;
use tracing::info;

use crate::runner::{JobRunner, RunnerError};

/// Shared state for the worker API
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    pub store: StoreHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_job))
        .route("/resume", post(resume_job))
        .route("/cancel", post(cancel_job))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Worker API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(err: RunnerError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        RunnerError::Busy(_) => StatusCode::CONFLICT,
        RunnerError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        RunnerError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RunnerError::NoStoredJob(_) => StatusCode::NOT_FOUND,
        RunnerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}

async fn start_job(
    State(state): State<AppState>,
    Json(payload): Json<JobStart>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state.runner.start(payload).await.map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_job(
    State(state): State<AppState>,
    Json(payload): Json<JobResume>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state.runner.resume(payload).await.map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_job(
    State(state): State<AppState>,
    Json(payload): Json<CancelRequest>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state.runner.cancel(&payload.job_id).await.map_err(error_response)?;
    Ok(StatusCode::ACCEPTED)
}

async fn status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.runner.status().await)
}

async fn health() -> &'static str {
    "ok"
}

/// Ready only when the store answers
async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.store.checkpoint_count("readiness-probe").await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
