//! Job lifecycle management.
//!
//! The manager owns job records, the strategy registry, and the single
//! completion loop that consumes scheduler signals. Per-job state moves
//! `Queued -> Running -> {Completed, Failed, Cancelled}`; terminal states
//! are final. Exactly one `job_complete` event is published per job, and
//! it is the last event on that job's stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use analytics::ResultStore;
use executor::{BacktestExecutor, TaskSpec};
use scheduler::{SchedulerConfig, Task, TaskDisposition, TaskScheduler, TaskSignal};
use sweep_core::{Job, JobEvent, JobStatus, OrchestratorError, Result};

use crate::event_bus::EventBus;
use crate::progress::ProgressAggregator;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub scheduler: SchedulerConfig,
    /// Backtest window: each task runs over the `lookback_days` ending at
    /// job start.
    pub lookback_days: i64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            lookback_days: 365,
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scheduler: SchedulerConfig::from_env(),
            lookback_days: std::env::var("BACKTEST_LOOKBACK_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&d: &i64| d > 0)
                .unwrap_or(defaults.lookback_days),
        }
    }
}

/// Live bookkeeping for a non-terminal job.
struct JobHandle {
    /// Shared with every scheduled task; set on cancellation.
    cancel: Arc<AtomicBool>,
    /// Tasks not yet accounted for (finished or skipped). Zero means the
    /// job drained and can be finalized.
    remaining: u32,
}

struct Inner {
    jobs: DashMap<Uuid, Job>,
    handles: DashMap<Uuid, JobHandle>,
    strategies: DashMap<String, chrono::DateTime<Utc>>,
    progress: ProgressAggregator,
    store: Arc<ResultStore>,
    bus: Arc<EventBus>,
}

impl Inner {
    /// Move a job to a terminal state, drop its live bookkeeping, and
    /// publish its single `job_complete` event.
    async fn finalize(&self, job_id: Uuid, status: JobStatus) {
        self.handles.remove(&job_id);
        let counters = self.progress.remove(job_id);

        let final_counters = {
            let Some(mut job) = self.jobs.get_mut(&job_id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            if let Some(counters) = counters {
                job.counters = counters;
            }
            job.status = status;
            job.finished_at = Some(Utc::now());
            job.counters
        };

        info!(job_id = %job_id, status = %status,
            successful = final_counters.successful, failed = final_counters.failed,
            "Job finalized");
        self.bus
            .publish(JobEvent::job_complete(job_id, status, final_counters))
            .await;
    }

    async fn handle_signal(&self, signal: TaskSignal) {
        match signal {
            TaskSignal::ExecutorLog(line) => {
                self.bus.publish(JobEvent::log(line)).await;
            }
            TaskSignal::Completion {
                job_id,
                instrument_code,
                disposition,
            } => {
                self.handle_completion(job_id, &instrument_code, disposition)
                    .await;
            }
        }
    }

    async fn handle_completion(
        &self,
        job_id: Uuid,
        instrument_code: &str,
        disposition: TaskDisposition,
    ) {
        // Collected first so no dashmap guard is held across publish.
        let mut events = Vec::new();

        match disposition {
            TaskDisposition::Finished(result) => {
                if let Some(snapshot) = self.progress.record(job_id, result.status) {
                    if let Some(mut job) = self.jobs.get_mut(&job_id) {
                        job.counters = snapshot.counters;
                    }
                    events.push(JobEvent::result(&result));
                    if snapshot.percent_changed {
                        events.push(JobEvent::progress(job_id, snapshot.counters));
                    }
                    self.store.append(result);
                } else {
                    // Finalized while the task was in flight; keep the
                    // result queryable but the counters stay frozen.
                    warn!(job_id = %job_id, instrument = %instrument_code,
                        "Result arrived for finalized job");
                    self.store.append(result);
                }
            }
            TaskDisposition::Skipped => {
                debug!(job_id = %job_id, instrument = %instrument_code,
                    "Task skipped after cancellation");
            }
        }

        let drained_cancelled = {
            match self.handles.get_mut(&job_id) {
                Some(mut handle) => {
                    handle.remaining = handle.remaining.saturating_sub(1);
                    if handle.remaining == 0 {
                        Some(handle.cancel.load(Ordering::Acquire))
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        for event in events {
            self.bus.publish(event).await;
        }

        if let Some(cancelled) = drained_cancelled {
            let status = if cancelled {
                JobStatus::Cancelled
            } else {
                JobStatus::Completed
            };
            self.finalize(job_id, status).await;
        }
    }
}

/// Owns jobs end to end: validation, scheduling, progress accounting,
/// result storage, and event publication.
pub struct JobManager {
    inner: Arc<Inner>,
    scheduler: TaskScheduler,
    config: ManagerConfig,
}

impl JobManager {
    /// Start the manager: spawns the scheduler's worker pool and the
    /// completion loop consuming its signals.
    pub fn new(executor: Arc<dyn BacktestExecutor>, config: ManagerConfig) -> Self {
        let inner = Arc::new(Inner {
            jobs: DashMap::new(),
            handles: DashMap::new(),
            strategies: DashMap::new(),
            progress: ProgressAggregator::new(),
            store: Arc::new(ResultStore::new()),
            bus: Arc::new(EventBus::default()),
        });

        let (scheduler, mut signal_rx) = TaskScheduler::spawn(executor, config.scheduler.clone());

        {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(signal) = signal_rx.recv().await {
                    inner.handle_signal(signal).await;
                }
                debug!("Scheduler signal channel closed, completion loop exiting");
            });
        }

        Self {
            inner,
            scheduler,
            config,
        }
    }

    /// Shared result store, for the query layer.
    pub fn store(&self) -> Arc<ResultStore> {
        self.inner.store.clone()
    }

    /// Shared event bus, for the streaming layer.
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    /// Register a strategy reference as runnable. Idempotent.
    pub fn register_strategy(&self, strategy_ref: impl Into<String>) {
        let strategy_ref = strategy_ref.into();
        self.inner
            .strategies
            .entry(strategy_ref.clone())
            .or_insert_with(Utc::now);
        debug!(strategy = %strategy_ref, "Strategy registered");
    }

    /// Registered strategy references, sorted.
    pub fn strategies(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .inner
            .strategies
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        refs.sort();
        refs
    }

    /// Validate and record a new job in `Queued`. Does not schedule
    /// anything.
    pub fn create_job(&self, strategy_ref: &str, universe: Vec<String>) -> Result<Job> {
        if universe.is_empty() {
            return Err(OrchestratorError::InvalidUniverse(
                "universe must contain at least one instrument".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for code in &universe {
            if code.trim().is_empty() {
                return Err(OrchestratorError::InvalidUniverse(
                    "instrument codes must be non-empty".to_string(),
                ));
            }
            if !seen.insert(code.as_str()) {
                return Err(OrchestratorError::InvalidUniverse(format!(
                    "duplicate instrument code: {code}"
                )));
            }
        }
        if !self.inner.strategies.contains_key(strategy_ref) {
            return Err(OrchestratorError::StrategyNotReady(
                strategy_ref.to_string(),
            ));
        }

        let job = Job::new(strategy_ref, universe);
        self.inner.bus.register(job.id);
        self.inner.progress.register(job.id, job.counters.total);
        self.inner.handles.insert(
            job.id,
            JobHandle {
                cancel: Arc::new(AtomicBool::new(false)),
                remaining: job.counters.total,
            },
        );
        self.inner.jobs.insert(job.id, job.clone());

        info!(job_id = %job.id, strategy = %job.strategy_ref,
            universe_size = job.counters.total, "Job created");
        Ok(job)
    }

    /// Hand a queued job's tasks to the scheduler. No-op for a job that
    /// is already running or terminal.
    pub async fn start(&self, job_id: Uuid) -> Result<Job> {
        let (tasks, snapshot) = {
            let mut job = self
                .inner
                .jobs
                .get_mut(&job_id)
                .ok_or(OrchestratorError::JobNotFound(job_id))?;
            if job.status != JobStatus::Queued {
                return Ok(job.clone());
            }

            let cancel = self
                .inner
                .handles
                .get(&job_id)
                .map(|handle| handle.cancel.clone())
                .ok_or(OrchestratorError::JobNotFound(job_id))?;

            let end = Utc::now();
            let start = end - ChronoDuration::days(self.config.lookback_days);
            let tasks: Vec<Task> = job
                .universe
                .iter()
                .map(|code| Task {
                    spec: TaskSpec {
                        job_id,
                        instrument_code: code.clone(),
                        strategy_ref: job.strategy_ref.clone(),
                        start,
                        end,
                    },
                    cancel: cancel.clone(),
                })
                .collect();

            job.status = JobStatus::Running;
            job.started_at = Some(end);
            (tasks, job.clone())
        };

        if let Err(e) = self.scheduler.submit(tasks) {
            error!(job_id = %job_id, error = %e, "Task submission failed, failing job");
            self.inner.finalize(job_id, JobStatus::Failed).await;
            return Err(e);
        }

        info!(job_id = %job_id, tasks = snapshot.counters.total, "Job started");
        Ok(snapshot)
    }

    /// Request cooperative cancellation. A queued job is cancelled
    /// immediately; a running job drains its in-flight tasks first.
    /// Cancelling a terminal job is a no-op.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        enum CancelAction {
            Noop,
            Immediate,
            Drain,
        }

        let action = {
            let job = self
                .inner
                .jobs
                .get(&job_id)
                .ok_or(OrchestratorError::JobNotFound(job_id))?;
            match job.status {
                status if status.is_terminal() => CancelAction::Noop,
                JobStatus::Queued => CancelAction::Immediate,
                _ => CancelAction::Drain,
            }
        };

        match action {
            CancelAction::Noop => {}
            CancelAction::Immediate => {
                // Mark the shared flag first: if a start slipped in
                // between the status read and this point, its dispatched
                // tasks must still be skipped.
                if let Some(handle) = self.inner.handles.get(&job_id) {
                    handle.cancel.store(true, Ordering::Release);
                }
                self.inner.finalize(job_id, JobStatus::Cancelled).await;
            }
            CancelAction::Drain => {
                if let Some(handle) = self.inner.handles.get(&job_id) {
                    handle.cancel.store(true, Ordering::Release);
                }
                info!(job_id = %job_id, "Cancellation requested, draining in-flight tasks");
            }
        }

        self.job(job_id)
    }

    /// Snapshot of one job.
    pub fn job(&self, job_id: Uuid) -> Result<Job> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|job| job.clone())
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Snapshots of all jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.jobs.iter().map(|j| j.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of spawned workers.
    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use executor::{ExecutionError, ExecutorLog};
    use std::time::Duration;
    use sweep_core::{TaskMetrics, TaskStatus};

    struct StubExecutor {
        delay: Duration,
        fail_instruments: Vec<String>,
    }

    #[async_trait]
    impl BacktestExecutor for StubExecutor {
        async fn run(
            &self,
            spec: &TaskSpec,
            log: &ExecutorLog,
        ) -> std::result::Result<TaskMetrics, ExecutionError> {
            log.info("starting run");
            tokio::time::sleep(self.delay).await;
            if self.fail_instruments.contains(&spec.instrument_code) {
                return Err(ExecutionError::DataUnavailable(format!(
                    "no data for {}",
                    spec.instrument_code
                )));
            }
            Ok(TaskMetrics {
                total_return: 0.12,
                sharpe_ratio: Some(1.1),
                max_drawdown: 0.07,
                win_rate: Some(0.55),
                profit_factor: Some(1.4),
                total_trades: 20,
            })
        }
    }

    fn manager(delay_ms: u64, fail_instruments: &[&str]) -> JobManager {
        let executor = Arc::new(StubExecutor {
            delay: Duration::from_millis(delay_ms),
            fail_instruments: fail_instruments.iter().map(|s| s.to_string()).collect(),
        });
        let config = ManagerConfig {
            scheduler: SchedulerConfig {
                workers: 2,
                task_timeout: Duration::from_secs(5),
            },
            lookback_days: 30,
        };
        let manager = JobManager::new(executor, config);
        manager.register_strategy("momentum_v1");
        manager
    }

    fn universe(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    async fn wait_terminal(manager: &JobManager, job_id: Uuid) -> Job {
        for _ in 0..200 {
            let job = manager.job(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let manager = manager(1, &[]);

        assert!(matches!(
            manager.create_job("momentum_v1", vec![]),
            Err(OrchestratorError::InvalidUniverse(_))
        ));
        assert!(matches!(
            manager.create_job("momentum_v1", universe(&["AAPL", "AAPL"])),
            Err(OrchestratorError::InvalidUniverse(_))
        ));
        assert!(matches!(
            manager.create_job("unregistered", universe(&["AAPL"])),
            Err(OrchestratorError::StrategyNotReady(_))
        ));

        let job = manager
            .create_job("momentum_v1", universe(&["AAPL", "MSFT"]))
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.counters.total, 2);
    }

    #[tokio::test]
    async fn test_job_runs_to_completion_with_mixed_results() {
        let manager = manager(1, &["BAD"]);
        let job = manager
            .create_job("momentum_v1", universe(&["GOOD1", "BAD", "GOOD2"]))
            .unwrap();
        manager.start(job.id).await.unwrap();

        let done = wait_terminal(&manager, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.counters.completed, 3);
        assert_eq!(done.counters.successful, 2);
        assert_eq!(done.counters.failed, 1);
        assert!(done.finished_at.is_some());

        let results = manager.store().results(job.id);
        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].instrument_code, "BAD");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let manager = manager(20, &[]);
        let job = manager
            .create_job("momentum_v1", universe(&["AAPL"]))
            .unwrap();

        let first = manager.start(job.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Running);
        let second = manager.start(job.id).await.unwrap();
        assert_eq!(second.status, JobStatus::Running);

        let done = wait_terminal(&manager, job.id).await;
        // A second start never re-enqueues tasks.
        assert_eq!(done.counters.completed, 1);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_immediate() {
        let manager = manager(1, &[]);
        let job = manager
            .create_job("momentum_v1", universe(&["AAPL", "MSFT"]))
            .unwrap();

        let cancelled = manager.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.counters.completed, 0);

        // Idempotent second cancel.
        let again = manager.cancel(job.id).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_of_queued_job_sets_shared_cancellation_flag() {
        let manager = manager(1, &[]);
        let job = manager
            .create_job("momentum_v1", universe(&["AAPL", "MSFT"]))
            .unwrap();

        // Tasks carry clones of this flag; a start racing the cancel
        // must see it set so nothing gets dispatched.
        let flag = manager
            .inner
            .handles
            .get(&job.id)
            .map(|handle| handle.cancel.clone())
            .unwrap();

        manager.cancel(job.id).await.unwrap();
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(
            manager.job(job.id).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_running_job_drains_and_freezes_counters() {
        let manager = manager(30, &[]);
        let codes: Vec<String> = (0..12).map(|i| format!("I{i}")).collect();
        let job = manager.create_job("momentum_v1", codes).unwrap();
        manager.start(job.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        manager.cancel(job.id).await.unwrap();

        let done = wait_terminal(&manager, job.id).await;
        assert_eq!(done.status, JobStatus::Cancelled);
        // Some tasks ran before the flag was seen, the rest were skipped.
        assert!(done.counters.completed < done.counters.total);
        assert_eq!(
            done.counters.completed,
            done.counters.successful + done.counters.failed
        );
        assert_eq!(
            manager.store().results(job.id).len(),
            done.counters.completed as usize
        );
    }

    #[tokio::test]
    async fn test_job_complete_is_exactly_once_and_last() {
        let manager = manager(1, &[]);
        let job = manager
            .create_job("momentum_v1", universe(&["A", "B", "C"]))
            .unwrap();
        let mut stream = manager.bus().subscribe(job.id).await;
        manager.start(job.id).await.unwrap();

        let mut complete_count = 0;
        let mut results_seen = 0;
        while let Some(event) = stream.events.recv().await {
            match event {
                JobEvent::JobComplete { total, .. } => {
                    complete_count += 1;
                    assert_eq!(total, 3);
                }
                JobEvent::Result { .. } => {
                    assert_eq!(complete_count, 0, "result after job_complete");
                    results_seen += 1;
                }
                JobEvent::Progress { .. } => {
                    assert_eq!(complete_count, 0, "progress after job_complete");
                }
                JobEvent::Log { .. } => {}
            }
        }
        assert_eq!(complete_count, 1);
        assert_eq!(results_seen, 3);
    }

    #[tokio::test]
    async fn test_unknown_job_queries() {
        let manager = manager(1, &[]);
        let missing = Uuid::new_v4();
        assert!(matches!(
            manager.job(missing),
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            manager.cancel(missing).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
        assert!(matches!(
            manager.start(missing).await,
            Err(OrchestratorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_strategy_registry() {
        let manager = manager(1, &[]);
        manager.register_strategy("mean_reversion_v2");
        manager.register_strategy("momentum_v1");
        assert_eq!(
            manager.strategies(),
            vec!["mean_reversion_v2".to_string(), "momentum_v1".to_string()]
        );
    }
}
