//! Shared application state.

use std::sync::Arc;

use analytics::ResultStore;
use orchestrator::{EventBus, JobManager};

/// State shared by all handlers. The manager owns the orchestration; the
/// bus and store handles are the manager's own, kept here so the
/// streaming and query paths avoid going through it.
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub bus: Arc<EventBus>,
    pub store: Arc<ResultStore>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>) -> Self {
        let bus = manager.bus();
        let store = manager.store();
        Self {
            manager,
            bus,
            store,
        }
    }
}
