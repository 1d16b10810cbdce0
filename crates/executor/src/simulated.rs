//! Simulated backtest executor.
//!
//! Produces deterministic pseudo-results keyed on the instrument code so
//! the orchestration engine can be exercised end to end without a real
//! backtesting library. Latency and failure behavior are configurable.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use sweep_core::TaskMetrics;

use crate::{BacktestExecutor, ExecutionError, ExecutorLog, TaskSpec};

/// Configuration for the simulated executor.
#[derive(Debug, Clone)]
pub struct SimulatedExecutorConfig {
    /// Base latency per run.
    pub base_latency: Duration,
    /// Additional random latency, up to this much.
    pub latency_jitter: Duration,
    /// Fraction of runs that fail with a data error (0.0 to 1.0).
    pub failure_rate: f64,
    /// Seed mixed into the per-instrument hash for reproducible sweeps.
    pub seed: u64,
}

impl Default for SimulatedExecutorConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::from_millis(20),
            latency_jitter: Duration::from_millis(30),
            failure_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimulatedExecutorConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_latency: std::env::var("SIM_EXECUTOR_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_latency),
            latency_jitter: std::env::var("SIM_EXECUTOR_JITTER_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.latency_jitter),
            failure_rate: std::env::var("SIM_EXECUTOR_FAILURE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_rate),
            seed: std::env::var("SIM_EXECUTOR_SEED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.seed),
        }
    }
}

/// Deterministic stand-in for a real backtesting library.
pub struct SimulatedExecutor {
    config: SimulatedExecutorConfig,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatedExecutorConfig) -> Self {
        Self { config }
    }

    fn rng_for(&self, spec: &TaskSpec) -> StdRng {
        let mut hasher = DefaultHasher::new();
        spec.instrument_code.hash(&mut hasher);
        spec.strategy_ref.hash(&mut hasher);
        self.config.seed.hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish())
    }
}

#[async_trait]
impl BacktestExecutor for SimulatedExecutor {
    async fn run(
        &self,
        spec: &TaskSpec,
        log: &ExecutorLog,
    ) -> Result<TaskMetrics, ExecutionError> {
        let mut rng = self.rng_for(spec);

        let bar_count = rng.gen_range(250..2520u32);
        log.info(format!(
            "loaded {} bars for {} to {}",
            bar_count,
            spec.start.date_naive(),
            spec.end.date_naive()
        ));

        let jitter = if self.config.latency_jitter.is_zero() {
            Duration::ZERO
        } else {
            self.config
                .latency_jitter
                .mul_f64(rng.gen_range(0.0..1.0))
        };
        tokio::time::sleep(self.config.base_latency + jitter).await;

        if rng.gen_range(0.0..1.0) < self.config.failure_rate {
            log.warn("price history has gaps, aborting run");
            return Err(ExecutionError::DataUnavailable(format!(
                "no contiguous history for {}",
                spec.instrument_code
            )));
        }

        let total_trades = rng.gen_range(0..120u32);
        let total_return = rng.gen_range(-0.30..0.50);
        let max_drawdown = rng.gen_range(0.01..0.40);
        let metrics = if total_trades == 0 {
            TaskMetrics {
                total_return,
                sharpe_ratio: None,
                max_drawdown,
                win_rate: None,
                profit_factor: None,
                total_trades,
            }
        } else {
            TaskMetrics {
                total_return,
                sharpe_ratio: Some(rng.gen_range(-1.0..3.0)),
                max_drawdown,
                win_rate: Some(rng.gen_range(0.2..0.8)),
                profit_factor: Some(rng.gen_range(0.5..2.5)),
                total_trades,
            }
        };

        debug!(
            instrument = %spec.instrument_code,
            strategy = %spec.strategy_ref,
            total_return = metrics.total_return,
            trades = metrics.total_trades,
            "Simulated backtest finished"
        );
        log.info(format!(
            "run finished: {} trades, total return {:.4}",
            metrics.total_trades, metrics.total_return
        ));

        Ok(metrics)
    }
}
