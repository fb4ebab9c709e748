//! HTTP submission API.
//!
//! Submit is non-blocking with respect to execution: it enqueues, writes
//! the initial QUEUED record, and returns 202. Pollers only ever read the
//! status cache -- the API never reaches into worker memory.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use cxe_core::cache::StatusCache;
use cxe_core::config::EngineConfig;
use cxe_core::language::LanguageRegistry;
use cxe_core::model::{StatusRecord, SubmissionRequest, SubmissionStatus};
use cxe_core::queue::SubmissionQueue;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State and response types
// ---------------------------------------------------------------------------

pub struct AppState {
    pub queue: Arc<SubmissionQueue>,
    pub cache: Arc<dyn StatusCache>,
    pub languages: Arc<LanguageRegistry>,
    pub config: EngineConfig,
    pub active_workers: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub message: String,
    pub queue_position: usize,
    pub estimated_wait_time_ms: u64,
    pub status_url: String,
    pub results_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_size: usize,
    pub active_workers: usize,
    pub avg_execution_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/execution/submit", post(submit))
        .route("/execution/status/{id}", get(status))
        .route("/execution/results/{id}", get(results))
        .route("/execution/cancel/{id}", delete(cancel))
        .route("/execution/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: Arc<AppState>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("cxe listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("cxe api shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<SubmissionRequest>,
) -> Result<axum::response::Response, AppError> {
    if request.code.trim().is_empty() {
        return Err(AppError::bad_request("code must not be empty"));
    }
    if request.test_cases.is_empty() {
        return Err(AppError::bad_request("testCases must not be empty"));
    }
    if state.languages.get(&request.language).is_none() {
        let mut supported = state.languages.list();
        supported.sort_unstable();
        return Err(AppError::bad_request(format!(
            "unsupported language {:?} (supported: {})",
            request.language,
            supported.join(", ")
        )));
    }
    if request
        .submission_id
        .as_deref()
        .is_some_and(|id| id.trim().is_empty())
    {
        return Err(AppError::bad_request("submissionId must not be blank"));
    }

    let submission_id = request
        .submission_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Same id submitted twice is rejected, not silently replayed.
    match state.cache.get(&submission_id).await {
        Ok(Some(_)) => {
            return Err(AppError::conflict(format!(
                "submission {submission_id} already exists"
            )));
        }
        Ok(None) => {}
        Err(e) => return Err(AppError::unavailable(format!("status cache unavailable: {e}"))),
    }

    tracing::info!(
        submission_id,
        user_id = %request.user_id,
        question_id = %request.question_id,
        language = %request.language,
        client_ip = request.client_ip.as_deref().unwrap_or("-"),
        user_agent = request.user_agent.as_deref().unwrap_or("-"),
        "submission accepted"
    );

    let record = StatusRecord::queued(submission_id.clone(), Utc::now());
    if let Err(e) = state.cache.put(record, state.config.cache_ttl).await {
        return Err(AppError::unavailable(format!("status cache unavailable: {e}")));
    }

    request.submission_id = Some(submission_id.clone());
    let queue_position = state.queue.enqueue(request).await;
    let estimated_wait_time_ms = state.queue.estimated_wait_ms().await;

    let response = SubmitResponse {
        submission_id: submission_id.clone(),
        status: SubmissionStatus::Queued,
        message: "submission accepted for execution".to_string(),
        queue_position,
        estimated_wait_time_ms,
        status_url: format!("/execution/status/{submission_id}"),
        results_url: format!("/execution/results/{submission_id}"),
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let record = read_record(&state, &id).await?;
    Ok(Json(record).into_response())
}

/// Same shape as `status`; intended for the final poll, so it also
/// extends the record's TTL.
async fn results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let record = read_record(&state, &id).await?;
    if let Err(e) = state.cache.touch(&id, state.config.cache_ttl).await {
        tracing::warn!(submission_id = %id, error = %e, "failed to extend record TTL");
    }
    Ok(Json(record).into_response())
}

async fn read_record(state: &AppState, id: &str) -> Result<StatusRecord, AppError> {
    let mut record = state
        .cache
        .get(id)
        .await
        .map_err(|e| AppError::unavailable(format!("status cache unavailable: {e}")))?
        .ok_or_else(|| AppError::not_found(format!("submission {id} not found")))?;

    // queuePosition is never stored; recompute it on read.
    if record.status == SubmissionStatus::Queued {
        record.queue_position = state.queue.position_of(id).await;
    }
    Ok(record)
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let current = state
        .cache
        .get(&id)
        .await
        .map_err(|e| AppError::unavailable(format!("status cache unavailable: {e}")))?
        .ok_or_else(|| AppError::bad_request(format!("submission {id} not found")))?;

    let mut cancelled = current;
    cancelled.status = SubmissionStatus::Cancelled;
    cancelled.completed_at = Some(Utc::now());
    cancelled.queue_position = None;
    cancelled.test_case_results = Vec::new();

    // Atomic iff still QUEUED; a submission a worker has claimed runs to
    // completion.
    let swapped = state
        .cache
        .compare_and_set(&id, SubmissionStatus::Queued, cancelled)
        .await
        .map_err(|e| AppError::unavailable(format!("status cache unavailable: {e}")))?;

    if !swapped {
        return Err(AppError::bad_request(format!(
            "submission {id} is not cancellable (already started or finished)"
        )));
    }

    // Best-effort removal; the worker-side CAS guard covers the race
    // where the queue entry was already taken.
    state.queue.cancel(&id).await;
    tracing::info!(submission_id = %id, "submission cancelled");

    Ok(Json(CancelResponse {
        submission_id: id,
        status: SubmissionStatus::Cancelled,
        message: "submission cancelled".to_string(),
    })
    .into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let response = HealthResponse {
        status: "UP",
        queue_size: state.queue.len().await,
        active_workers: state.active_workers,
        avg_execution_time_ms: state.queue.avg_execution_ms().await as u64,
    };
    Json(response).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
