//! Backtest Executor
//!
//! The contract between the orchestration engine and the external
//! backtesting library, plus a simulated implementation used by the demo
//! server wiring and tests.
//!
//! The engine treats the executor as a black box: it may be slow (seconds
//! per run) and cannot be cancelled mid-flight. Timeouts are enforced by
//! the scheduler around the call, never inside it.

pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use sweep_core::{LogLevel, LogLine, TaskMetrics};

pub use simulated::{SimulatedExecutor, SimulatedExecutorConfig};

/// Everything the executor needs to run one instrument's backtest.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub job_id: Uuid,
    pub instrument_code: String,
    pub strategy_ref: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Failure reported by the executor for a single run.
///
/// These are recovered locally: the scheduler turns them into failed
/// task results and never lets them abort the worker or the job.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("price history unavailable: {0}")]
    DataUnavailable(String),

    #[error("strategy execution failed: {0}")]
    Strategy(String),

    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Cloneable handle the executor uses to surface log lines while a task
/// runs. Lines are tagged with the owning job and forwarded to event
/// stream subscribers.
#[derive(Debug, Clone)]
pub struct ExecutorLog {
    job_id: Uuid,
    instrument_code: String,
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ExecutorLog {
    pub fn new(
        job_id: Uuid,
        instrument_code: impl Into<String>,
        tx: mpsc::UnboundedSender<LogLine>,
    ) -> Self {
        Self {
            job_id,
            instrument_code: instrument_code.into(),
            tx,
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    fn emit(&self, level: LogLevel, message: String) {
        // Receiver gone means no subscriber cares anymore; drop silently.
        let _ = self.tx.send(LogLine {
            job_id: self.job_id,
            level,
            message: format!("[{}] {}", self.instrument_code, message),
        });
    }
}

/// Contract for the external backtesting library.
#[async_trait]
pub trait BacktestExecutor: Send + Sync {
    /// Run the strategy against a single instrument and return its
    /// metrics, or a typed failure.
    async fn run(&self, spec: &TaskSpec, log: &ExecutorLog)
        -> Result<TaskMetrics, ExecutionError>;
}
