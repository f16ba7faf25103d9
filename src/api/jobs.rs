use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiState;
use crate::error::OrchestratorError;
use crate::scheduler::{Job, JobFilter, JobReport, JobRequest, QueueStats, ReportOutcome, WorkerId};

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub decided_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub decided_by: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub worker_id: WorkerId,
    #[serde(flatten)]
    pub report: JobReport,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub outcome: ReportOutcome,
    pub job: Job,
}

type ApiResult<T> = Result<T, OrchestratorError>;

pub async fn create(
    State(state): State<ApiState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.orchestrator.create_job(request)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list(
    State(state): State<ApiState>,
    Query(filter): Query<JobFilter>,
) -> Json<Vec<Job>> {
    Json(state.orchestrator.list_jobs(&filter))
}

pub async fn stats(State(state): State<ApiState>) -> Json<QueueStats> {
    Json(state.orchestrator.stats())
}

pub async fn pending(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.orchestrator.pending_jobs())
}

pub async fn awaiting_approval(State(state): State<ApiState>) -> Json<Vec<Job>> {
    Json(state.orchestrator.jobs_awaiting_approval())
}

pub async fn get_one(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    Ok(Json(state.orchestrator.get_job(&id)?))
}

pub async fn approve(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveRequest>>,
) -> ApiResult<Json<Job>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(state.orchestrator.approve(&id, body.decided_by)?))
}

pub async fn reject(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<Json<Job>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(state.orchestrator.reject(&id, body.decided_by, body.reason)?))
}

pub async fn assign(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.orchestrator.assign_to(&id, &request.worker_id)?))
}

pub async fn cancel(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    Ok(Json(state.orchestrator.cancel(&id)?))
}

pub async fn report(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReportRequest>,
) -> ApiResult<Json<ReportResponse>> {
    let outcome = state
        .orchestrator
        .report(&id, &request.worker_id, request.report)?;
    let job = state.orchestrator.get_job(&id)?;
    Ok(Json(ReportResponse { outcome, job }))
}
