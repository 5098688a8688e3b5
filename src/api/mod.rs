//! HTTP intake surface.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /job?mode=sync\|async` | submit a job (default `sync`, waits for results) |
//! | `GET /job/:id` | wait for an async job and collect its results (once) |
//! | `POST /register` | register or refresh a worker |
//! | `GET /api/workers` | known workers |
//! | `GET /api/status` | scheduler counters |

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::SupervisorError;
use crate::scheduler::{Job, Registration, Scheduler, SubmissionSender, Worker};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Scheduler,
    pub intake: SubmissionSender,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitParams {
    #[serde(default)]
    mode: SubmitMode,
}

#[derive(Serialize)]
struct AcceptedResponse {
    job_id: Uuid,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct WorkerResponse {
    id: u64,
    hostname: String,
    busy: bool,
    priority: u64,
    consecutive_failures: u32,
}

impl From<Worker> for WorkerResponse {
    fn from(worker: Worker) -> Self {
        Self {
            id: worker.id,
            hostname: worker.hostname,
            busy: worker.busy,
            priority: worker.priority,
            consecutive_failures: worker.consecutive_failures,
        }
    }
}

/// Maps scheduler errors onto HTTP status codes.
pub struct ApiError(pub SupervisorError);

impl From<SupervisorError> for ApiError {
    fn from(e: SupervisorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SupervisorError::InvalidJob(_) | SupervisorError::InvalidRegistration(_) => {
                StatusCode::BAD_REQUEST
            }
            SupervisorError::DuplicateJob(_) => StatusCode::CONFLICT,
            SupervisorError::UnknownJob(_) => StatusCode::NOT_FOUND,
            SupervisorError::IntakeFull
            | SupervisorError::IntakeClosed
            | SupervisorError::LedgerFull(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SupervisorError::JobAbandoned { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/job", post(submit_job_handler))
        .route("/job/:id", get(job_results_handler))
        .route("/register", post(register_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting HTTP intake server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

fn parse_body<T: serde::de::DeserializeOwned>(
    body: &Bytes,
    invalid: fn(String) -> SupervisorError,
) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(invalid(format!("malformed body: {e}"))))
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let job: Job = parse_body(&body, SupervisorError::InvalidJob)?;

    match params.mode {
        SubmitMode::Async => {
            let job_id = state.intake.submit_async(job).await?;
            Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { job_id })).into_response())
        }
        SubmitMode::Sync => {
            let results = state.intake.submit_sync(job).await?;
            Ok((StatusCode::OK, Json(results)).into_response())
        }
    }
}

async fn job_results_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let results = state.scheduler.collect(job_id).await?;
    Ok(Json(results).into_response())
}

async fn register_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Worker>, ApiError> {
    let registration: Registration = parse_body(&body, SupervisorError::InvalidRegistration)?;
    let worker = state.scheduler.pool().register(registration).await?;
    Ok(Json(worker))
}

async fn list_workers_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let workers: Vec<WorkerResponse> = state
        .scheduler
        .pool()
        .snapshot()
        .await
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    Json(workers)
}

async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}
