//! Sweep Core
//!
//! Shared domain types for the backsweep orchestration engine: jobs and
//! their lifecycle, per-instrument task results, the metric taxonomy, the
//! event protocol streamed to subscribers, and the error taxonomy.

pub mod error;
pub mod event;
pub mod types;

pub use error::{OrchestratorError, Result};
pub use event::{JobEvent, LogLevel, LogLine};
pub use types::{
    Job, JobCounters, JobStatus, Metric, TaskMetrics, TaskResult, TaskStatus,
};
