//! Per-job progress aggregation.

use dashmap::DashMap;
use uuid::Uuid;

use sweep_core::{JobCounters, TaskStatus};

/// Counter snapshot returned after recording one completion.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub counters: JobCounters,
    pub percent: u8,
    /// Whether the integer percentage moved with this completion; drives
    /// `progress` event emission.
    pub percent_changed: bool,
}

/// Maintains per-job counters updated as tasks finish.
///
/// Counters hold the invariant `completed == successful + failed <= total`
/// and are monotonically non-decreasing while the job runs. Once a job is
/// finalized its entry is dropped; the final counters live on the job
/// record.
#[derive(Default)]
pub struct ProgressAggregator {
    counters: DashMap<Uuid, JobCounters>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job with its task total before any completion arrives.
    pub fn register(&self, job_id: Uuid, total: u32) {
        self.counters.insert(job_id, JobCounters::new(total));
    }

    /// Record one task completion and return the updated snapshot.
    /// Returns `None` for unregistered (already finalized) jobs.
    pub fn record(&self, job_id: Uuid, status: TaskStatus) -> Option<ProgressSnapshot> {
        let mut entry = self.counters.get_mut(&job_id)?;
        let before = entry.percent();

        entry.completed += 1;
        match status {
            TaskStatus::Success => entry.successful += 1,
            TaskStatus::Failed => entry.failed += 1,
        }

        let counters = *entry;
        let percent = counters.percent();
        Some(ProgressSnapshot {
            counters,
            percent,
            percent_changed: percent != before,
        })
    }

    /// Current counters for a job, if still registered.
    pub fn snapshot(&self, job_id: Uuid) -> Option<JobCounters> {
        self.counters.get(&job_id).map(|entry| *entry)
    }

    /// Drop a finalized job's entry.
    pub fn remove(&self, job_id: Uuid) -> Option<JobCounters> {
        self.counters.remove(&job_id).map(|(_, counters)| counters)
    }
}
