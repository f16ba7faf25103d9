use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::error::OrchestratorError;
use crate::scheduler::{Heartbeat, HeartbeatAck, Job, Worker, WorkerId, WorkerRegistration};

const DEFAULT_POLL_JOBS: usize = 1;

#[derive(Debug, Default, Deserialize)]
pub struct PollRequest {
    pub max_jobs: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: i64,
}

#[derive(Debug, Serialize)]
pub struct WorkerDetail {
    #[serde(flatten)]
    pub worker: Worker,
    pub jobs: Vec<Job>,
}

type ApiResult<T> = Result<T, OrchestratorError>;

pub async fn register(
    State(state): State<ApiState>,
    Json(registration): Json<WorkerRegistration>,
) -> ApiResult<impl IntoResponse> {
    let worker = state.orchestrator.register_worker(registration)?;
    Ok((StatusCode::OK, Json(worker)))
}

pub async fn list(State(state): State<ApiState>) -> Json<Vec<Worker>> {
    Json(state.orchestrator.list_workers())
}

pub async fn available(State(state): State<ApiState>) -> Json<Vec<Worker>> {
    Json(state.orchestrator.available_workers())
}

pub async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
) -> ApiResult<Json<WorkerDetail>> {
    let worker = state.orchestrator.get_worker(&id)?;
    let jobs = state.orchestrator.worker_jobs(&id)?;
    Ok(Json(WorkerDetail { worker, jobs }))
}

pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
    body: Option<Json<Heartbeat>>,
) -> ApiResult<Json<HeartbeatAck>> {
    let heartbeat = body.map(|Json(hb)| hb).unwrap_or_default();
    Ok(Json(state.orchestrator.heartbeat(&id, heartbeat)?))
}

pub async fn poll(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
    body: Option<Json<PollRequest>>,
) -> ApiResult<Json<PollResponse>> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let max_jobs = request.max_jobs.unwrap_or(DEFAULT_POLL_JOBS);
    let jobs = state.orchestrator.poll(&id, max_jobs)?;
    Ok(Json(PollResponse { jobs }))
}

pub async fn set_priority(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
    Json(request): Json<PriorityRequest>,
) -> ApiResult<Json<Worker>> {
    Ok(Json(state.orchestrator.set_worker_priority(&id, request.priority)?))
}

pub async fn enable(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
) -> ApiResult<Json<Worker>> {
    Ok(Json(state.orchestrator.set_worker_enabled(&id, true)?))
}

pub async fn disable(
    State(state): State<ApiState>,
    Path(id): Path<WorkerId>,
) -> ApiResult<Json<Worker>> {
    Ok(Json(state.orchestrator.set_worker_enabled(&id, false)?))
}
