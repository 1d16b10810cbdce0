//! Job, task, and metric types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::OrchestratorError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created and validated, not yet handed to the scheduler.
    Queued,
    /// At least one task has been dispatched.
    Running,
    /// All tasks ran to completion (individual tasks may have failed).
    Completed,
    /// Job-level fault before any task executed.
    Failed,
    /// Cancellation requested and all in-flight tasks drained.
    Cancelled,
}

impl JobStatus {
    /// Terminal states are final and immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Aggregate per-job task counters.
///
/// Invariant: `completed == successful + failed` and `completed <= total`,
/// all monotonically non-decreasing while the job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobCounters {
    pub total: u32,
    pub completed: u32,
    pub successful: u32,
    pub failed: u32,
}

impl JobCounters {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Progress percentage: `floor(100 * completed / total)`, 0 for an
    /// empty job.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((100 * u64::from(self.completed)) / u64::from(self.total)) as u8
    }
}

/// One strategy-vs-universe backtest request and its aggregate lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub strategy_ref: String,
    /// Ordered set of instrument codes; duplicates are rejected at
    /// creation.
    pub universe: Vec<String>,
    pub status: JobStatus,
    pub counters: JobCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(strategy_ref: impl Into<String>, universe: Vec<String>) -> Self {
        let total = universe.len() as u32;
        Self {
            id: Uuid::new_v4(),
            strategy_ref: strategy_ref.into(),
            universe,
            status: JobStatus::Queued,
            counters: JobCounters::new(total),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn progress(&self) -> u8 {
        self.counters.percent()
    }
}

/// Outcome of a single per-instrument task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
}

/// Numeric metrics produced by one successful backtest run.
///
/// Sharpe, win rate, and profit factor are undefined for a run that
/// produced no trades, hence optional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskMetrics {
    pub total_return: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub win_rate: Option<f64>,
    pub profit_factor: Option<f64>,
    pub total_trades: u32,
}

/// Result of running the strategy against one instrument. Immutable once
/// created; owned by the job's result store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub instrument_code: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(job_id: Uuid, instrument_code: impl Into<String>, metrics: TaskMetrics) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            instrument_code: instrument_code.into(),
            status: TaskStatus::Success,
            metrics: Some(metrics),
            error_message: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        job_id: Uuid,
        instrument_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            instrument_code: instrument_code.into(),
            status: TaskStatus::Failed,
            metrics: None,
            error_message: Some(error_message.into()),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Value of the given metric, if this result is successful and the
    /// metric is defined for it.
    pub fn metric_value(&self, metric: Metric) -> Option<f64> {
        if !self.is_success() {
            return None;
        }
        self.metrics.as_ref().and_then(|m| metric.extract(m))
    }
}

/// The numeric result fields a distribution can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalReturn,
    SharpeRatio,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
}

impl Metric {
    /// Extract this metric's value from a set of task metrics.
    pub fn extract(&self, metrics: &TaskMetrics) -> Option<f64> {
        match self {
            Metric::TotalReturn => Some(metrics.total_return),
            Metric::SharpeRatio => metrics.sharpe_ratio,
            Metric::MaxDrawdown => Some(metrics.max_drawdown),
            Metric::WinRate => metrics.win_rate,
            Metric::ProfitFactor => metrics.profit_factor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::TotalReturn => "total_return",
            Metric::SharpeRatio => "sharpe_ratio",
            Metric::MaxDrawdown => "max_drawdown",
            Metric::WinRate => "win_rate",
            Metric::ProfitFactor => "profit_factor",
        }
    }
}

impl FromStr for Metric {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total_return" => Ok(Metric::TotalReturn),
            "sharpe_ratio" => Ok(Metric::SharpeRatio),
            "max_drawdown" => Ok(Metric::MaxDrawdown),
            "win_rate" => Ok(Metric::WinRate),
            "profit_factor" => Ok(Metric::ProfitFactor),
            other => Err(OrchestratorError::UnknownMetric(other.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
