//! Dispatches messages arriving from the extension.
//!
//! Replies are routed to the bridge immediately. Tab events go to one worker
//! per tab, so events for the same tab are handled in arrival order while
//! different tabs proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::bridge::NativeBridge;
use crate::coordinator::Coordinator;
use crate::page::{Tab, TabId, TimerId};
use crate::protocol::Inbound;
use crate::store::RuleStore;

#[derive(Debug)]
enum TabEvent {
    Updated(Tab),
    ScriptFailed { timer: TimerId, error: String },
    Removed,
}

pub struct Host {
    bridge: Arc<NativeBridge>,
    coordinator: Arc<Coordinator>,
    store: Arc<RuleStore>,
    workers: HashMap<TabId, mpsc::UnboundedSender<TabEvent>>,
    tasks: JoinSet<()>,
}

impl Host {
    pub fn new(bridge: Arc<NativeBridge>, coordinator: Arc<Coordinator>, store: Arc<RuleStore>) -> Self {
        Self {
            bridge,
            coordinator,
            store,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Handles messages until the extension closes the channel, then fails
    /// any requests still waiting for a reply and drains the tab workers.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(msg) = inbound.recv().await {
            self.dispatch(msg);
        }
        info!("Extension disconnected");
        self.bridge.disconnect();
        self.workers.clear();
        while self.tasks.join_next().await.is_some() {}
    }

    fn dispatch(&mut self, msg: Inbound) {
        self.reap();
        match msg {
            Inbound::Response { id, ok, result, error } => self.bridge.resolve(id, ok, result, error),
            Inbound::TabUpdated { tab } => self.route(tab.id, TabEvent::Updated(tab)),
            Inbound::ScriptFailed { tab_id, timer_id, error } => self.route(
                tab_id,
                TabEvent::ScriptFailed {
                    timer: timer_id,
                    error,
                },
            ),
            Inbound::TabRemoved { tab_id } => {
                self.route(tab_id, TabEvent::Removed);
                self.workers.remove(&tab_id);
            }
            Inbound::Reconcile => {
                let coordinator = self.coordinator.clone();
                let store = self.store.clone();
                self.tasks.spawn(async move {
                    let result = match store.reload().await {
                        Ok(rules) => coordinator.reconcile_all(rules).await.map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    match result {
                        Ok(report) => info!("Reconciled on request: {:?}", report),
                        Err(e) => error!("Requested reconciliation failed: {}", e),
                    }
                });
            }
        }
    }

    /// Collects workers and reconcile tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Host task failed: {}", e);
            }
        }
    }

    fn route(&mut self, tab: TabId, event: TabEvent) {
        let coordinator = &self.coordinator;
        let tasks = &mut self.tasks;
        let tx = self.workers.entry(tab).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.spawn(tab_worker(tab, coordinator.clone(), rx));
            tx
        });
        if tx.send(event).is_err() {
            debug!("Worker for tab {} already stopped", tab);
        }
    }
}

async fn tab_worker(tab: TabId, coordinator: Arc<Coordinator>, mut rx: mpsc::UnboundedReceiver<TabEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TabEvent::Updated(t) => {
                let outcome = coordinator.on_tab_updated(&t).await;
                debug!("Tab {} loaded {}: {:?}", tab, t.url, outcome);
            }
            TabEvent::ScriptFailed { timer, error } => {
                coordinator.on_script_failed(tab, timer, &error).await;
            }
            TabEvent::Removed => {
                coordinator.on_tab_removed(tab).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_finished_tasks_are_reaped() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(NativeBridge::new(tx, Duration::from_secs(1)));
        let coordinator = Arc::new(Coordinator::new(bridge.clone(), bridge.clone()));
        let store = Arc::new(RuleStore::open(dir.path().join("rules.json")).await.unwrap());
        let mut host = Host::new(bridge, coordinator, store);

        for tab in 0..50 {
            host.dispatch(Inbound::TabRemoved { tab_id: tab });
        }
        assert_eq!(host.tasks.len(), 50);
        assert!(host.workers.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        host.dispatch(Inbound::TabRemoved { tab_id: 100 });
        assert_eq!(host.tasks.len(), 1);
    }
}
