//! Shared state handed to every request handler.

use std::sync::Arc;

use driftwatch::plans::PlanStore;
use driftwatch::store::ResourceStore;
use driftwatch::watch::WatchManager;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub watch: Arc<WatchManager>,
    pub plans: Arc<dyn PlanStore>,
}

impl AppState {
    /// Bundles the shared services of the server.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        watch: Arc<WatchManager>,
        plans: Arc<dyn PlanStore>,
    ) -> Self {
        Self {
            store,
            watch,
            plans,
        }
    }
}
