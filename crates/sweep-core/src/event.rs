//! The per-job event protocol.
//!
//! Events are ephemeral: they are fanned out to live subscribers and never
//! persisted. Within one job's stream, `job_complete` is always the last
//! event delivered, after every `result` event for that job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::types::{JobCounters, JobStatus, TaskMetrics, TaskStatus};

/// Severity of a forwarded executor log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A log line emitted by the executor during a task, tagged with the
/// originating job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
}

/// Event streamed to subscribers of a job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Aggregate progress moved to a new integer percentage.
    Progress {
        job_id: Uuid,
        progress: u8,
        completed: u32,
        total: u32,
        successful: u32,
        failed: u32,
        ts: DateTime<Utc>,
    },
    /// One per-instrument task finished.
    Result {
        job_id: Uuid,
        result_id: Uuid,
        instrument_code: String,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<TaskMetrics>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        ts: DateTime<Utc>,
    },
    /// Executor log line forwarded from a running task.
    Log {
        job_id: Uuid,
        level: LogLevel,
        message: String,
        ts: DateTime<Utc>,
    },
    /// The job reached a terminal state. Exactly one per job, delivered
    /// last.
    JobComplete {
        job_id: Uuid,
        status: JobStatus,
        successful: u32,
        failed: u32,
        total: u32,
        ts: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn progress(job_id: Uuid, counters: JobCounters) -> Self {
        JobEvent::Progress {
            job_id,
            progress: counters.percent(),
            completed: counters.completed,
            total: counters.total,
            successful: counters.successful,
            failed: counters.failed,
            ts: Utc::now(),
        }
    }

    pub fn result(result: &crate::types::TaskResult) -> Self {
        JobEvent::Result {
            job_id: result.job_id,
            result_id: result.id,
            instrument_code: result.instrument_code.clone(),
            status: result.status,
            metrics: result.metrics,
            error_message: result.error_message.clone(),
            ts: result.finished_at,
        }
    }

    pub fn log(line: LogLine) -> Self {
        JobEvent::Log {
            job_id: line.job_id,
            level: line.level,
            message: line.message,
            ts: Utc::now(),
        }
    }

    pub fn job_complete(job_id: Uuid, status: JobStatus, counters: JobCounters) -> Self {
        JobEvent::JobComplete {
            job_id,
            status,
            successful: counters.successful,
            failed: counters.failed,
            total: counters.total,
            ts: Utc::now(),
        }
    }

    /// The job this event belongs to.
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Result { job_id, .. }
            | JobEvent::Log { job_id, .. }
            | JobEvent::JobComplete { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::JobComplete { .. })
    }
}
