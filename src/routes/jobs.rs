// src/routes/jobs.rs
//
// Thin HTTP handlers over SearchJobService. Request validation beyond
// ownership checks and config validation lives upstream of this service.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::jobs::models::{Job, NewJob};
use crate::jobs::service::JobServiceError;
use crate::AppState;

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
}

#[derive(Deserialize)]
pub struct UserScope {
    pub user_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

fn map_error(e: JobServiceError) -> (StatusCode, String) {
    match e {
        JobServiceError::NotFound => (StatusCode::NOT_FOUND, "job not found".to_string()),
        JobServiceError::NotCancellable | JobServiceError::NotRetryable => {
            (StatusCode::CONFLICT, e.to_string())
        }
        JobServiceError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            error!("job request failed: {:?}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

/// POST /jobs
pub async fn create_job_handler(
    State(state): State<AppState>,
    Json(new): Json<NewJob>,
) -> Result<Json<CreateJobResponse>, (StatusCode, String)> {
    let job = state.job_service.create_job(new).await.map_err(map_error)?;
    Ok(Json(CreateJobResponse { job_id: job.id }))
}

/// POST /jobs/:id/execute
///
/// Latency-sensitive path that runs the job now instead of waiting for the
/// next poll cycle.
pub async fn execute_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .job_processor
        .execute_now(job_id)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /jobs/:id?user_id=...
pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(scope): Query<UserScope>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let job = state
        .job_service
        .get_job(job_id, scope.user_id)
        .await
        .map_err(map_error)?;
    Ok(Json(job))
}

/// GET /jobs?user_id=...&limit=...
pub async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(scope): Query<UserScope>,
) -> Result<Json<Vec<Job>>, (StatusCode, String)> {
    let jobs = state
        .job_service
        .list_jobs(scope.user_id, scope.limit)
        .await
        .map_err(map_error)?;
    Ok(Json(jobs))
}

/// POST /jobs/:id/cancel
pub async fn cancel_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.job_service.cancel_job(job_id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /jobs/:id/retry
pub async fn retry_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.job_service.retry_job(job_id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}
