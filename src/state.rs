use std::sync::Arc;

use tracing::warn;

use crate::coordinator::Coordinator;
use crate::store::RuleStore;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<RuleStore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, store: Arc<RuleStore>) -> SharedState {
        Arc::new(Self { coordinator, store })
    }

    /// Pushes the store's current rules through the coordinator after an edit.
    pub async fn sync_rules(&self) {
        let rules = self.store.all().await;
        if let Err(e) = self.coordinator.on_rules_changed(rules).await {
            warn!("Failed to reconcile tabs after rule edit: {}", e);
        }
    }
}
