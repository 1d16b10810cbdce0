//! Per-job event fan-out.
//!
//! Each subscriber gets its own bounded channel for `progress`, `result`,
//! and `job_complete` events: delivery to a slow consumer may block
//! momentarily but those events are never dropped, because client state
//! correctness depends on them. `log` events go through a per-job
//! broadcast ring instead; a lagging subscriber loses the oldest buffered
//! log lines only.
//!
//! Subscribers that connect mid-run see events from the point of
//! subscription onward. There is no replay; catch-up is a result store
//! query. Jobs are registered with the bus at creation; after the
//! `job_complete` event is fanned out the bus drops the job's channel
//! state, every subscriber stream ends, and late subscriptions yield an
//! already-closed stream instead of resurrecting the channel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use sweep_core::JobEvent;

/// Default per-subscriber buffer for critical events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
/// Default per-job ring size for log events.
pub const DEFAULT_LOG_CAPACITY: usize = 512;

#[derive(Clone)]
struct JobChannel {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<JobEvent>>>>,
    log_tx: broadcast::Sender<JobEvent>,
}

/// A subscriber's view of one job's event stream.
pub struct JobEventStream {
    /// Critical events: progress, result, job_complete. Ends (returns
    /// `None`) once the job's channel state is released.
    pub events: mpsc::Receiver<JobEvent>,
    /// Log events; may lag under backpressure.
    pub logs: broadcast::Receiver<JobEvent>,
}

/// Multiplexes job events to zero or more live subscribers per job.
pub struct EventBus {
    jobs: DashMap<Uuid, JobChannel>,
    event_capacity: usize,
    log_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY, DEFAULT_LOG_CAPACITY)
    }
}

impl EventBus {
    pub fn new(event_capacity: usize, log_capacity: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            event_capacity: event_capacity.max(1),
            log_capacity: log_capacity.max(1),
        }
    }

    /// Start tracking a job. Idempotent; called when the job is created
    /// so subscriptions and publishes have a channel to attach to.
    pub fn register(&self, job_id: Uuid) {
        self.jobs.entry(job_id).or_insert_with(|| JobChannel {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            log_tx: broadcast::channel(self.log_capacity).0,
        });
    }

    /// Whether the bus still tracks a job's channel state.
    pub fn is_live(&self, job_id: Uuid) -> bool {
        self.jobs.contains_key(&job_id)
    }

    /// Open a new subscription to a job's stream. Closing the returned
    /// stream stops delivery to that subscriber only; the job itself is
    /// unaffected. Subscribing to a job the bus no longer tracks (or
    /// never tracked) returns a stream that has already ended, so a
    /// subscription racing finalization cannot resurrect the channel.
    pub async fn subscribe(&self, job_id: Uuid) -> JobEventStream {
        let Some(channel) = self.jobs.get(&job_id).map(|c| c.clone()) else {
            let (_, events) = mpsc::channel(1);
            let (log_tx, logs) = broadcast::channel(1);
            drop(log_tx);
            return JobEventStream { events, logs };
        };
        let (tx, rx) = mpsc::channel(self.event_capacity);
        channel.subscribers.lock().await.push(tx);
        JobEventStream {
            events: rx,
            logs: channel.log_tx.subscribe(),
        }
    }

    /// Fan an event out to all current subscribers of its job.
    pub async fn publish(&self, event: JobEvent) {
        let job_id = event.job_id();
        // Clone the handles out so no dashmap guard is held across await.
        let Some(channel) = self.jobs.get(&job_id).map(|c| c.clone()) else {
            return;
        };

        if matches!(event, JobEvent::Log { .. }) {
            // No receivers is fine; logs are best-effort.
            let _ = channel.log_tx.send(event);
            return;
        }

        let terminal = event.is_terminal();
        let mut subscribers = channel.subscribers.lock().await;
        let mut alive = Vec::with_capacity(subscribers.len());
        for tx in subscribers.drain(..) {
            // Awaited send: blocks momentarily under backpressure rather
            // than dropping a critical event. A closed receiver means the
            // subscriber disconnected; prune it.
            if tx.send(event.clone()).await.is_ok() {
                alive.push(tx);
            }
        }
        *subscribers = alive;
        drop(subscribers);

        if terminal {
            // Last event delivered; release per-job resources. Dropping
            // the senders ends every subscriber's critical stream.
            self.jobs.remove(&job_id);
            debug!(job_id = %job_id, "Event bus released job channel");
        }
    }

    /// Number of live subscribers for a job.
    pub async fn subscriber_count(&self, job_id: Uuid) -> usize {
        match self.jobs.get(&job_id).map(|c| c.clone()) {
            Some(channel) => channel.subscribers.lock().await.len(),
            None => 0,
        }
    }
}
