//! Backtest Job Orchestration
//!
//! Ties the scheduler, progress accounting, result store, and event bus
//! together behind the [`JobManager`]. The REST and WebSocket layers sit
//! on top of this crate and hold no orchestration state of their own.

pub mod event_bus;
pub mod manager;
pub mod progress;

pub use event_bus::{EventBus, JobEventStream};
pub use manager::{JobManager, ManagerConfig};
pub use progress::{ProgressAggregator, ProgressSnapshot};
