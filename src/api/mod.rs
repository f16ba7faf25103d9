use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{OrchestratorError, Result};
use crate::scheduler::Orchestrator;

mod jobs;
mod workers;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl OrchestratorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrchestratorError::JobNotFound(_) | OrchestratorError::WorkerNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            OrchestratorError::InvalidTransition { .. }
            | OrchestratorError::StaleReport { .. }
            | OrchestratorError::WorkerIneligible { .. } => StatusCode::CONFLICT,
            OrchestratorError::InvalidProgress { .. }
            | OrchestratorError::InvalidRegistration { .. }
            | OrchestratorError::InvalidPriority(_)
            | OrchestratorError::CapabilityMismatch { .. }
            | OrchestratorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::Io(_) | OrchestratorError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    strategy: String,
    jobs: usize,
    workers: usize,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/jobs", get(jobs::list).post(jobs::create))
        .route("/api/jobs/stats", get(jobs::stats))
        .route("/api/jobs/pending", get(jobs::pending))
        .route("/api/jobs/awaiting-approval", get(jobs::awaiting_approval))
        .route("/api/jobs/:id", get(jobs::get_one))
        .route("/api/jobs/:id/approve", post(jobs::approve))
        .route("/api/jobs/:id/reject", post(jobs::reject))
        .route("/api/jobs/:id/assign", post(jobs::assign))
        .route("/api/jobs/:id/cancel", post(jobs::cancel))
        .route("/api/jobs/:id/report", post(jobs::report))
        .route("/api/workers", get(workers::list))
        .route("/api/workers/register", post(workers::register))
        .route("/api/workers/available", get(workers::available))
        .route("/api/workers/:id", get(workers::get_one))
        .route("/api/workers/:id/heartbeat", post(workers::heartbeat))
        .route("/api/workers/:id/poll", post(workers::poll))
        .route("/api/workers/:id/priority", post(workers::set_priority))
        .route("/api/workers/:id/enable", post(workers::enable))
        .route("/api/workers/:id/disable", post(workers::disable))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `token` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, token: CancellationToken) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
        e
    })?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let stats = orchestrator.stats();
    Json(HealthResponse {
        status: "ok",
        strategy: orchestrator.config().assignment_strategy.to_string(),
        jobs: stats.total_jobs,
        workers: stats.workers.total,
    })
}
