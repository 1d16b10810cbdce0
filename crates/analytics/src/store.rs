//! In-memory result store.

use dashmap::DashMap;
use uuid::Uuid;

use sweep_core::TaskResult;

/// Per-job accumulator of task results.
///
/// Appends are O(1) amortized and safe to call concurrently with reads;
/// readers get a snapshot copy of the results appended so far, never a
/// live reference, so distribution computations never hold the store
/// lock while sorting.
#[derive(Default)]
pub struct ResultStore {
    results: DashMap<Uuid, Vec<TaskResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one finished task's result to its job.
    pub fn append(&self, result: TaskResult) {
        self.results.entry(result.job_id).or_default().push(result);
    }

    /// Snapshot of all results recorded for a job so far.
    pub fn results(&self, job_id: Uuid) -> Vec<TaskResult> {
        self.results
            .get(&job_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Number of results recorded for a job.
    pub fn len(&self, job_id: Uuid) -> usize {
        self.results.get(&job_id).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, job_id: Uuid) -> bool {
        self.len(job_id) == 0
    }
}
