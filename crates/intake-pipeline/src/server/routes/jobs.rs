//! Job polling and cancellation endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::JobSnapshot;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobSnapshot>> {
    state
        .jobs()
        .get_job(job_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobSnapshot>> {
    let snapshot = state
        .jobs()
        .cancel_job(job_id)
        .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;
    tracing::info!("Cancel requested for job {} ({:?})", job_id, snapshot.state);
    Ok(Json(snapshot))
}

/// GET /api/jobs, newest first
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.jobs().list_jobs(),
    })
}
