//! Orchestrator HTTP API

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use eyre::Result;
use jobstore::{Datasource, DatasourceKind, Job, JobStatus, JobSubmission, ResumeRequest, StatusReport};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::lifecycle::Orchestrator;

/// Shared state for the orchestrator API
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/jobs/:id/status", post(job_status_callback))
        .route("/datasources", get(list_datasources).post(create_datasource))
        .route("/datasources/:id", put(update_datasource).delete(delete_datasource))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Orchestrator API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()})))
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()})))
}

fn not_found(what: impl std::fmt::Display) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"error": what.to_string()})))
}

// === Jobs ===

async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if submission.description.trim().is_empty() {
        return Err(bad_request("description must not be empty"));
    }
    let job = state.orchestrator.submit(submission).await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(json!({"job_id": job.id}))))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let status = match query.status {
        Some(s) => Some(s.parse::<JobStatus>().map_err(bad_request)?),
        None => None,
    };
    let jobs = state.orchestrator.store().list_jobs(status).await.map_err(internal)?;
    Ok(Json(jobs))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    let job = state
        .orchestrator
        .store()
        .get_job(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("job {}", id)))?;
    Ok(Json(job))
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.orchestrator.cancel(&id).await.map_err(bad_request)?;
    Ok(StatusCode::ACCEPTED)
}

async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .resume(&id, request.approved, request.feedback)
        .await
        .map_err(bad_request)?;
    Ok(StatusCode::ACCEPTED)
}

/// Worker status callback receiver
async fn job_status_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut report): Json<StatusReport>,
) -> Result<StatusCode, ApiError> {
    report.job_id = id;
    state.orchestrator.apply_report(report).await.map_err(internal)?;
    Ok(StatusCode::OK)
}

// === Datasources ===

#[derive(Debug, Deserialize)]
struct DatasourcePayload {
    kind: DatasourceKind,
    name: String,
    #[serde(default)]
    description: String,
    connection_url: String,
    credentials: Option<String>,
    #[serde(default)]
    read_only: bool,
    job_id: Option<String>,
}

async fn list_datasources(State(state): State<AppState>) -> Result<Json<Vec<Datasource>>, ApiError> {
    let datasources = state.orchestrator.store().list_datasources().await.map_err(internal)?;
    Ok(Json(datasources))
}

async fn create_datasource(
    State(state): State<AppState>,
    Json(payload): Json<DatasourcePayload>,
) -> Result<(StatusCode, Json<Datasource>), ApiError> {
    let mut ds = match &payload.job_id {
        Some(job_id) => Datasource::scoped(payload.kind, payload.name, payload.connection_url, job_id.as_str()),
        None => Datasource::global(payload.kind, payload.name, payload.connection_url),
    };
    ds.description = payload.description;
    ds.credentials = payload.credentials;
    ds.read_only = payload.read_only;

    let created = ds.clone();
    state
        .orchestrator
        .store()
        .create_datasource(ds)
        .await
        .map_err(|e| (StatusCode::CONFLICT, Json(json!({"error": e.to_string()}))))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_datasource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DatasourcePayload>,
) -> Result<StatusCode, ApiError> {
    let store = state.orchestrator.store();
    let mut ds = store
        .get_datasource(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("datasource {}", id)))?;

    ds.name = payload.name;
    ds.description = payload.description;
    ds.connection_url = payload.connection_url;
    ds.credentials = payload.credentials;
    ds.read_only = payload.read_only;

    store.update_datasource(ds).await.map_err(internal)?;
    Ok(StatusCode::OK)
}

async fn delete_datasource(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .store()
        .delete_datasource(&id)
        .await
        .map_err(|e| not_found(e))?;
    Ok(StatusCode::NO_CONTENT)
}

// === Probes ===

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    match state.orchestrator.store().list_jobs(Some(JobStatus::Pending)).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
