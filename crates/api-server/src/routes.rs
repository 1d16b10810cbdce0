//! API route definitions.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{distribution, health, jobs, strategies};
use crate::state::AppState;
use crate::websocket;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Backsweep API",
        version = "1.0.0",
        description = "REST and WebSocket API for backtest job orchestration"
    ),
    paths(
        health::health_check,
        health::readiness,
        jobs::create_job,
        jobs::list_jobs,
        jobs::get_job,
        jobs::cancel_job,
        jobs::list_job_results,
        distribution::get_distribution,
        strategies::register_strategy,
        strategies::list_strategies,
    ),
    components(
        schemas(
            crate::error::ErrorResponse,
            jobs::CreateJobRequest,
            jobs::JobResponse,
            strategies::RegisterStrategyRequest,
            strategies::StrategyListResponse,
            health::HealthResponse,
            sweep_core::JobStatus,
            sweep_core::TaskStatus,
            sweep_core::TaskResult,
            sweep_core::TaskMetrics,
            sweep_core::Metric,
            sweep_core::JobEvent,
            sweep_core::LogLevel,
            analytics::DistributionResponse,
            analytics::Bucket,
            analytics::MetricStatistics,
            analytics::Outliers,
            analytics::OutlierEntry,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "jobs", description = "Backtest job lifecycle"),
        (name = "analytics", description = "Result distribution analytics"),
        (name = "strategies", description = "Strategy registry"),
        (name = "websocket", description = "Real-time job event streams"),
    )
)]
pub struct ApiDoc;

/// Create the main router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))

        // Job endpoints
        .route("/api/v1/jobs", post(jobs::create_job))
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/v1/jobs/{job_id}/results", get(jobs::list_job_results))
        .route(
            "/api/v1/jobs/{job_id}/distribution",
            get(distribution::get_distribution),
        )

        // Strategy registry
        .route("/api/v1/strategies", post(strategies::register_strategy))
        .route("/api/v1/strategies", get(strategies::list_strategies))

        // WebSocket endpoints
        .route("/ws/jobs/{job_id}/events", get(websocket::ws_job_events_handler))

        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))

        // Add state
        .with_state(state)
}
