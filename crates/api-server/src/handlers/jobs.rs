//! Job lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use sweep_core::{Job, JobStatus, TaskResult};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request to submit a new backtest job.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    /// Reference to a registered strategy.
    pub strategy_ref: String,
    /// Instrument codes to sweep, duplicate-free.
    pub universe: Vec<String>,
}

/// Job snapshot returned by all job endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    /// Job identifier.
    pub job_id: Uuid,
    /// Strategy being swept.
    pub strategy_ref: String,
    /// Universe size (one task per instrument).
    pub universe_size: u32,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Integer progress percentage.
    pub progress: u8,
    /// Tasks accounted for so far.
    pub completed: u32,
    /// Tasks that produced metrics.
    pub successful: u32,
    /// Tasks that failed or timed out.
    pub failed: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the first task was handed to the scheduler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            strategy_ref: job.strategy_ref,
            universe_size: job.counters.total,
            status: job.status,
            progress: job.counters.percent(),
            completed: job.counters.completed,
            successful: job.counters.successful,
            failed: job.counters.failed,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    /// Filter by lifecycle state.
    pub status: Option<JobStatus>,
    /// Maximum number of jobs to return.
    pub limit: Option<usize>,
    /// Number of jobs to skip (newest first).
    pub offset: Option<usize>,
}

/// Submit a backtest job. The job is validated, queued, and immediately
/// handed to the scheduler.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted and scheduled", body = JobResponse),
        (status = 404, description = "Unknown strategy reference", body = crate::error::ErrorResponse),
        (status = 422, description = "Invalid universe", body = crate::error::ErrorResponse),
        (status = 503, description = "Scheduler unavailable", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let job = state
        .manager
        .create_job(&request.strategy_ref, request.universe)?;
    let job = state.manager.start(job.id).await?;

    info!(job_id = %job.id, strategy = %job.strategy_ref, "Job accepted");
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// List job snapshots, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    tag = "jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Job snapshots", body = [JobResponse])
    )
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs: Vec<JobResponse> = state
        .manager
        .jobs()
        .into_iter()
        .filter(|job| query.status.map_or(true, |s| job.status == s))
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(100))
        .map(JobResponse::from)
        .collect();
    Ok(Json(jobs))
}

/// Get one job's snapshot.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    tag = "jobs",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier")
    ),
    responses(
        (status = 200, description = "Job snapshot", body = JobResponse),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.manager.job(job_id)?;
    Ok(Json(job.into()))
}

/// Request cooperative cancellation of a job. In-flight tasks drain;
/// queued tasks are skipped. Idempotent for terminal jobs.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{job_id}/cancel",
    tag = "jobs",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier")
    ),
    responses(
        (status = 200, description = "Cancellation accepted", body = JobResponse),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.manager.cancel(job_id).await?;
    Ok(Json(job.into()))
}

/// Per-instrument results recorded for a job so far.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}/results",
    tag = "jobs",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier")
    ),
    responses(
        (status = 200, description = "Task results", body = [TaskResult]),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_job_results(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TaskResult>>> {
    // 404 for unknown jobs; an empty list means a known job with no
    // results yet.
    if state.manager.job(job_id).is_err() {
        return Err(ApiError::NotFound(format!("job not found: {job_id}")));
    }
    Ok(Json(state.store.results(job_id)))
}
