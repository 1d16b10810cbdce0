//! Error taxonomy for the orchestration engine.
//!
//! Validation errors are rejected synchronously at the API boundary and
//! never reach the scheduler. Per-task execution failures are not errors
//! at this level; they become failed `TaskResult`s.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid universe: {0}")]
    InvalidUniverse(String),

    #[error("Strategy not ready: {0}")]
    StrategyNotReady(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
