//! API Server
//!
//! REST and WebSocket API for the backtest job orchestration engine.
//!
//! # Features
//!
//! - **REST API**: job submission, cancellation, results, distributions
//! - **WebSocket**: per-job real-time event streams
//! - **OpenAPI**: auto-generated Swagger documentation
//!
//! # Example
//!
//! ```ignore
//! use api_server::{ApiServer, ServerConfig};
//!
//! let config = ServerConfig::from_env();
//! let server = ApiServer::new(config, executor);
//! server.run().await?;
//! ```

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod websocket;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use axum::http::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use executor::BacktestExecutor;
use orchestrator::{JobManager, ManagerConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins (development only).
    pub cors_permissive: bool,
    /// Scheduler and job manager knobs.
    pub manager: ManagerConfig,
    /// Strategy references registered at startup.
    pub seed_strategies: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_permissive: true,
            manager: ManagerConfig::default(),
            seed_strategies: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .or_else(|_| std::env::var("API_PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            cors_permissive: std::env::var("CORS_PERMISSIVE")
                .map(|v| v == "true")
                .unwrap_or(true),
            manager: ManagerConfig::from_env(),
            seed_strategies: std::env::var("REGISTERED_STRATEGIES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// The API server.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server around the given executor. Spawns the
    /// scheduler worker pool and the job manager's completion loop.
    pub fn new(config: ServerConfig, executor: Arc<dyn BacktestExecutor>) -> Self {
        let manager = Arc::new(JobManager::new(executor, config.manager.clone()));
        for strategy_ref in &config.seed_strategies {
            manager.register_strategy(strategy_ref.clone());
        }

        let state = Arc::new(AppState::new(manager));
        Self { config, state }
    }

    /// Shared application state, for tests and embedding.
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = create_router(self.state.clone());
        let router = router
            .layer(
                TraceLayer::new_for_http()
                    .on_request(|request: &Request<_>, _span: &tracing::Span| {
                        tracing::info!(
                            method = %request.method(),
                            uri = %request.uri(),
                            "Incoming request"
                        );
                    })
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
            )
            .layer(if self.config.cors_permissive {
                CorsLayer::permissive()
            } else {
                CorsLayer::new().allow_origin(Any)
            });

        let addr = self.config.socket_addr()?;
        info!(address = %addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
