//! API Server binary entrypoint.

use std::sync::Arc;

use api_server::{ApiServer, ServerConfig};
use executor::{SimulatedExecutor, SimulatedExecutorConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_server=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Create server config from environment
    let config = ServerConfig::from_env();

    // The simulated executor stands in for the external backtesting
    // library behind the scheduler.
    let executor = Arc::new(SimulatedExecutor::new(SimulatedExecutorConfig::from_env()));

    // Create and run server
    let server = ApiServer::new(config, executor);
    server.run().await?;

    Ok(())
}
