//! Strategy registry handlers.
//!
//! Registration is the boundary with the upstream strategy tooling: a
//! reference registered here is assumed already validated. Job creation
//! rejects unregistered references.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request to register a strategy reference.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterStrategyRequest {
    /// Strategy reference, e.g. `momentum_v1`.
    pub strategy_ref: String,
}

/// Registered strategy references.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StrategyListResponse {
    pub strategies: Vec<String>,
}

/// Register a strategy reference as runnable. Idempotent.
#[utoipa::path(
    post,
    path = "/api/v1/strategies",
    tag = "strategies",
    request_body = RegisterStrategyRequest,
    responses(
        (status = 201, description = "Strategy registered", body = StrategyListResponse),
        (status = 422, description = "Empty strategy reference", body = crate::error::ErrorResponse)
    )
)]
pub async fn register_strategy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterStrategyRequest>,
) -> ApiResult<(StatusCode, Json<StrategyListResponse>)> {
    let strategy_ref = request.strategy_ref.trim();
    if strategy_ref.is_empty() {
        return Err(ApiError::Validation(
            "strategy_ref must be non-empty".to_string(),
        ));
    }

    state.manager.register_strategy(strategy_ref);
    info!(strategy = %strategy_ref, "Strategy registered via API");

    Ok((
        StatusCode::CREATED,
        Json(StrategyListResponse {
            strategies: state.manager.strategies(),
        }),
    ))
}

/// List registered strategy references.
#[utoipa::path(
    get,
    path = "/api/v1/strategies",
    tag = "strategies",
    responses(
        (status = 200, description = "Registered strategies", body = StrategyListResponse)
    )
)]
pub async fn list_strategies(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<StrategyListResponse>> {
    Ok(Json(StrategyListResponse {
        strategies: state.manager.strategies(),
    }))
}
