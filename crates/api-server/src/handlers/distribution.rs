//! Distribution analytics handler.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use analytics::{distribution, DistributionRequest, DistributionResponse, DEFAULT_OUTLIER_K};
use sweep_core::Metric;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_BUCKET_COUNT: usize = 10;

/// Query parameters for a distribution request.
#[derive(Debug, Deserialize, IntoParams)]
pub struct DistributionQuery {
    /// Metric to bucket, e.g. `total_return` or `sharpe_ratio`.
    pub metric: String,
    /// Number of equal-width buckets.
    pub bucket_count: Option<usize>,
    /// Number of best/worst entries to return.
    pub outliers: Option<usize>,
}

/// Histogram, summary statistics, and outliers of a metric across a
/// job's successful results. Computed over a snapshot; results that
/// arrive while the job is still running are picked up by the next call.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}/distribution",
    tag = "analytics",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier"),
        DistributionQuery
    ),
    responses(
        (status = 200, description = "Metric distribution", body = DistributionResponse),
        (status = 404, description = "Job not found", body = crate::error::ErrorResponse),
        (status = 422, description = "Unknown metric or invalid bucket count", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_distribution(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<DistributionQuery>,
) -> ApiResult<Json<DistributionResponse>> {
    if state.manager.job(job_id).is_err() {
        return Err(ApiError::NotFound(format!("job not found: {job_id}")));
    }

    let metric: Metric = query.metric.parse().map_err(ApiError::from)?;
    let request = DistributionRequest {
        metric,
        bucket_count: query.bucket_count.unwrap_or(DEFAULT_BUCKET_COUNT),
        outlier_k: query.outliers.unwrap_or(DEFAULT_OUTLIER_K),
    };

    let results = state.store.results(job_id);
    let response = distribution(&results, request)?;
    Ok(Json(response))
}
