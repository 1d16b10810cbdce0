//! Backsweep
//!
//! Backtest job orchestration and event streaming engine. One strategy is
//! fanned out across a universe of instruments, per-instrument backtests
//! run on a bounded worker pool, and aggregate progress, results, and
//! distribution analytics are exposed while the job is still running.
//!
//! This root crate only re-exports the workspace members for the
//! workspace-level integration tests; the server binary lives in
//! `crates/api-server`.

pub use analytics;
pub use executor;
pub use orchestrator;
pub use scheduler;
pub use sweep_core;
