//! Task Scheduler
//!
//! A fixed pool of workers pulls per-instrument tasks from a shared queue
//! and runs them against the backtest executor under a mandatory per-task
//! timeout. Tasks from different jobs interleave; ordering is FIFO in
//! submission order. A single task failure never aborts the worker, the
//! queue, or the job; it only produces a failed task result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use executor::{BacktestExecutor, ExecutorLog, TaskSpec};
use sweep_core::{LogLine, OrchestratorError, TaskResult};

/// One unit of work: run the strategy against a single instrument.
#[derive(Debug, Clone)]
pub struct Task {
    pub spec: TaskSpec,
    /// Job-level cancellation flag, checked before dispatch. A set flag
    /// skips the task without invoking the executor.
    pub cancel: Arc<AtomicBool>,
}

/// What happened to one submitted task.
#[derive(Debug)]
pub enum TaskDisposition {
    /// The executor ran (or timed out) and produced a result.
    Finished(TaskResult),
    /// The job was cancelled before this task was dispatched.
    Skipped,
}

/// Message emitted by the worker pool as tasks are accounted for.
#[derive(Debug)]
pub enum TaskSignal {
    Completion {
        job_id: Uuid,
        instrument_code: String,
        disposition: TaskDisposition,
    },
    /// Log line forwarded from the executor mid-task.
    ExecutorLog(LogLine),
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Mandatory per-task timeout around the executor call.
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            task_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: std::env::var("SCHEDULER_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.workers),
            task_timeout: std::env::var("TASK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_timeout),
        }
    }
}

/// Handle to a running worker pool.
pub struct TaskScheduler {
    task_tx: mpsc::UnboundedSender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    /// Start the worker pool. Completions and forwarded executor logs
    /// arrive on the returned channel.
    pub fn spawn(
        executor: Arc<dyn BacktestExecutor>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TaskSignal>) {
        let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<TaskSignal>();

        // Executor log lines flow through their own channel and are
        // re-tagged as signals so the completion loop sees one stream.
        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogLine>();
        {
            let signal_tx = signal_tx.clone();
            tokio::spawn(async move {
                while let Some(line) = log_rx.recv().await {
                    if signal_tx.send(TaskSignal::ExecutorLog(line)).is_err() {
                        break;
                    }
                }
            });
        }

        let shared_rx = Arc::new(Mutex::new(task_rx));
        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                shared_rx.clone(),
                executor.clone(),
                config.task_timeout,
                signal_tx.clone(),
                log_tx.clone(),
            )));
        }

        info!(
            workers = worker_count,
            timeout_secs = config.task_timeout.as_secs(),
            "Task scheduler started"
        );

        (Self { task_tx, workers }, signal_rx)
    }

    /// Enqueue a job's tasks. Returns immediately; execution is picked up
    /// by the worker pool. Failure to enqueue anything is the job-level
    /// fault that fails the whole job.
    pub fn submit(&self, tasks: Vec<Task>) -> Result<(), OrchestratorError> {
        for task in tasks {
            self.task_tx.send(task).map_err(|_| {
                OrchestratorError::SchedulerUnavailable("worker pool is shut down".to_string())
            })?;
        }
        Ok(())
    }

    /// Number of spawned workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    executor: Arc<dyn BacktestExecutor>,
    task_timeout: Duration,
    signal_tx: mpsc::UnboundedSender<TaskSignal>,
    log_tx: mpsc::UnboundedSender<LogLine>,
) {
    loop {
        // Hold the queue lock only while pulling the next task.
        let task = { queue.lock().await.recv().await };
        let Some(task) = task else {
            debug!(worker = worker_id, "Task queue closed, worker exiting");
            break;
        };

        let job_id = task.spec.job_id;
        let instrument_code = task.spec.instrument_code.clone();

        if task.cancel.load(Ordering::Acquire) {
            debug!(worker = worker_id, job_id = %job_id, instrument = %instrument_code,
                "Skipping task for cancelled job");
            let _ = signal_tx.send(TaskSignal::Completion {
                job_id,
                instrument_code,
                disposition: TaskDisposition::Skipped,
            });
            continue;
        }

        let log = ExecutorLog::new(job_id, &instrument_code, log_tx.clone());
        let result = match tokio::time::timeout(task_timeout, executor.run(&task.spec, &log)).await
        {
            Ok(Ok(metrics)) => TaskResult::success(job_id, &instrument_code, metrics),
            Ok(Err(e)) => {
                debug!(worker = worker_id, job_id = %job_id, instrument = %instrument_code,
                    error = %e, "Executor reported failure");
                TaskResult::failed(job_id, &instrument_code, e.to_string())
            }
            Err(_) => {
                warn!(worker = worker_id, job_id = %job_id, instrument = %instrument_code,
                    timeout_secs = task_timeout.as_secs(), "Executor call timed out");
                TaskResult::failed(
                    job_id,
                    &instrument_code,
                    format!("executor timed out after {}s", task_timeout.as_secs()),
                )
            }
        };

        if signal_tx
            .send(TaskSignal::Completion {
                job_id,
                instrument_code,
                disposition: TaskDisposition::Finished(result),
            })
            .is_err()
        {
            // Completion consumer gone; nothing left to report to.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use executor::ExecutionError;
    use std::sync::atomic::AtomicUsize;
    use sweep_core::{TaskMetrics, TaskStatus};

    struct StubExecutor {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_instruments: Vec<String>,
    }

    impl StubExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_instruments: Vec::new(),
            }
        }

        fn failing_on(mut self, instrument: &str) -> Self {
            self.fail_instruments.push(instrument.to_string());
            self
        }
    }

    #[async_trait]
    impl BacktestExecutor for StubExecutor {
        async fn run(
            &self,
            spec: &TaskSpec,
            _log: &ExecutorLog,
        ) -> Result<TaskMetrics, ExecutionError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_instruments.contains(&spec.instrument_code) {
                return Err(ExecutionError::DataUnavailable(format!(
                    "no data for {}",
                    spec.instrument_code
                )));
            }
            Ok(TaskMetrics {
                total_return: 0.1,
                sharpe_ratio: Some(1.0),
                max_drawdown: 0.05,
                win_rate: Some(0.6),
                profit_factor: Some(1.5),
                total_trades: 10,
            })
        }
    }

    fn make_task(job_id: Uuid, instrument: &str, cancel: Arc<AtomicBool>) -> Task {
        Task {
            spec: TaskSpec {
                job_id,
                instrument_code: instrument.to_string(),
                strategy_ref: "momentum_v1".to_string(),
                start: Utc::now() - ChronoDuration::days(30),
                end: Utc::now(),
            },
            cancel,
        }
    }

    async fn collect_finished(
        rx: &mut mpsc::UnboundedReceiver<TaskSignal>,
        expected: usize,
    ) -> Vec<TaskResult> {
        let mut results = Vec::new();
        while results.len() < expected {
            match rx.recv().await.expect("signal channel closed early") {
                TaskSignal::Completion {
                    disposition: TaskDisposition::Finished(result),
                    ..
                } => results.push(result),
                TaskSignal::Completion { .. } | TaskSignal::ExecutorLog(_) => {}
            }
        }
        results
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let executor = Arc::new(StubExecutor::new(Duration::from_millis(5)));
        let config = SchedulerConfig {
            workers: 2,
            task_timeout: Duration::from_secs(5),
        };
        let (scheduler, mut rx) = TaskScheduler::spawn(executor, config);

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let tasks = ["A", "B", "C", "D"]
            .iter()
            .map(|code| make_task(job_id, code, cancel.clone()))
            .collect();
        scheduler.submit(tasks).unwrap();

        let results = collect_finished(&mut rx, 4).await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == TaskStatus::Success));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_worker_count() {
        let executor = Arc::new(StubExecutor::new(Duration::from_millis(30)));
        let config = SchedulerConfig {
            workers: 2,
            task_timeout: Duration::from_secs(5),
        };
        let (scheduler, mut rx) = TaskScheduler::spawn(executor.clone(), config);

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let tasks = (0..8)
            .map(|i| make_task(job_id, &format!("I{i}"), cancel.clone()))
            .collect();
        scheduler.submit(tasks).unwrap();

        collect_finished(&mut rx, 8).await;
        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_one_task() {
        let executor =
            Arc::new(StubExecutor::new(Duration::from_millis(1)).failing_on("BAD"));
        let config = SchedulerConfig {
            workers: 3,
            task_timeout: Duration::from_secs(5),
        };
        let (scheduler, mut rx) = TaskScheduler::spawn(executor, config);

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let tasks = ["GOOD1", "BAD", "GOOD2"]
            .iter()
            .map(|code| make_task(job_id, code, cancel.clone()))
            .collect();
        scheduler.submit(tasks).unwrap();

        let results = collect_finished(&mut rx, 3).await;
        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].instrument_code, "BAD");
        assert!(failed[0].error_message.as_deref().unwrap().contains("no data"));
    }

    #[tokio::test]
    async fn test_timeout_produces_failed_result() {
        let executor = Arc::new(StubExecutor::new(Duration::from_secs(10)));
        let config = SchedulerConfig {
            workers: 1,
            task_timeout: Duration::from_millis(20),
        };
        let (scheduler, mut rx) = TaskScheduler::spawn(executor, config);

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        scheduler
            .submit(vec![make_task(job_id, "SLOW", cancel)])
            .unwrap();

        let results = collect_finished(&mut rx, 1).await;
        assert_eq!(results[0].status, TaskStatus::Failed);
        assert!(results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_tasks_are_skipped_not_run() {
        let executor = Arc::new(StubExecutor::new(Duration::from_millis(1)));
        let config = SchedulerConfig {
            workers: 1,
            task_timeout: Duration::from_secs(5),
        };
        let (scheduler, mut rx) = TaskScheduler::spawn(executor, config);

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(true));
        let tasks = ["X", "Y"]
            .iter()
            .map(|code| make_task(job_id, code, cancel.clone()))
            .collect();
        scheduler.submit(tasks).unwrap();

        let mut skipped = 0;
        while skipped < 2 {
            match rx.recv().await.unwrap() {
                TaskSignal::Completion {
                    disposition: TaskDisposition::Skipped,
                    ..
                } => skipped += 1,
                TaskSignal::Completion {
                    disposition: TaskDisposition::Finished(_),
                    ..
                } => panic!("cancelled task should not run"),
                TaskSignal::ExecutorLog(_) => {}
            }
        }
    }
}
