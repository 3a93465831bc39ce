// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Job API: axum router wiring every route over `AppState`'s
//! `Arc` handles to the Job Store, Status Channel, Job Scheduler, and
//! WebSocket Fanout.
#![deny(unsafe_code)]

pub mod api;
pub mod middleware;

use crate::api::{
    ApiErrorBody, CancelResponse, HealthResponse, JobStatusResponse, SubmitJobRequest,
    SubmitJobResponse, validate_submission,
};
use crate::middleware::{cors_layer, request_id_middleware, request_logger};
use axum::{
    Json, Router,
    extract::{Path as AxPath, State, WebSocketUpgrade},
    http::StatusCode,
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use sf_core::JobStatus;
use sf_error::{ErrorCode, SfError};
use sf_scheduler::{JobScheduler, SchedulerError};
use sf_status::StatusChannel;
use sf_store::JobStore;
use sf_ws::WsFanout;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Process-wide handles shared by every route. No global statics — every
/// handler receives this through axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub status: Arc<StatusChannel>,
    pub scheduler: Arc<JobScheduler>,
    pub fanout: Arc<WsFanout>,
    pub output_root: String,
    pub started_at: Instant,
}

/// A uniform error response shape: `{status: "failed", error: {...}}`
/// mirrors the status payload's error contract, so clients parse API
/// errors and job failures the same way.
pub struct ApiError {
    http_status: StatusCode,
    body: ApiErrorBody,
}

impl From<&SfError> for ApiError {
    fn from(err: &SfError) -> Self {
        let http_status = match err.code {
            ErrorCode::InputNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InputInvalidPayload | ErrorCode::InputPreconditionMissing => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            http_status,
            body: ApiErrorBody::from(err),
        }
    }
}

impl From<&SchedulerError> for ApiError {
    fn from(err: &SchedulerError) -> Self {
        let sf_err = SfError::from(err);
        let http_status = match err {
            SchedulerError::NotRunning(_) => StatusCode::NOT_FOUND,
            SchedulerError::AlreadyTerminal(_) => StatusCode::CONFLICT,
            _ => ApiError::from(&sf_err).http_status,
        };
        Self {
            http_status,
            body: ApiErrorBody::from(&sf_err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.http_status, Json(serde_json::json!({ "error": self.body }))).into_response()
    }
}

/// Build the axum router with every Job API route.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job_status))
        .route("/jobs/{id}", delete(cancel_job))
        .route("/artifacts/{id}", get(get_artifact))
        .route("/stream/jobs/{id}", get(stream_job))
        .layer(cors_layer())
        .layer(from_fn(request_logger))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut queue_depths = std::collections::BTreeMap::new();
    for (kind, stats) in state.scheduler.queue_stats() {
        queue_depths.insert(format!("{kind:?}"), stats.len);
    }
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        queue_depths,
    })
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    validate_submission(req.kind, &req.input).map_err(|e| ApiError::from(&e))?;

    let template_stem = req
        .input
        .get("template_ref")
        .and_then(|v| v.as_str())
        .and_then(|s| std::path::Path::new(s).file_stem())
        .and_then(|s| s.to_str())
        .map(str::to_string);

    let id = state
        .scheduler
        .submit(req.kind, req.input, template_stem)
        .await
        .map_err(|e| ApiError::from(&e))?;

    let job = state
        .store
        .get(id)
        .await
        .map_err(|e| ApiError::from(&SfError::from(&e)))?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
        }),
    ))
}

async fn get_job_status(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .store
        .get(id)
        .await
        .map_err(|e| ApiError::from(&SfError::from(&e)))?;
    let snapshot = state.status.current(id).await.unwrap_or(None);
    Ok(Json(JobStatusResponse::merge(&job, snapshot)))
}

async fn cancel_job(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job = state.scheduler.cancel(id).await.map_err(|e| ApiError::from(&e))?;
    Ok(Json(CancelResponse {
        job_id: job.id,
        status: job.status,
    }))
}

async fn get_artifact(
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let job = state
        .store
        .get(id)
        .await
        .map_err(|e| ApiError::from(&SfError::from(&e)))?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::from(&SfError::new(
            ErrorCode::InputInvalidPayload,
            format!("job {id} is not completed"),
        )));
    }
    let path = format!("{}/{id}/presentation.pptx", state.output_root);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::from(&SfError::new(ErrorCode::StoreIoFailed, e.to_string())))?;
    Ok((
        StatusCode::OK,
        [("content-type", "application/octet-stream")],
        bytes,
    )
        .into_response())
}

async fn stream_job(
    ws: WebSocketUpgrade,
    AxPath(id): AxPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.fanout.handle_socket(socket, id).await;
    })
}
