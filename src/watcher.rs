//! Watches the rules file and reconciles tabs when it changes on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::store::RuleStore;

/// Keeps the notify watcher alive. Dropping it stops the reload task.
pub struct RulesWatcher {
    _watcher: RecommendedWatcher,
    _shutdown_tx: mpsc::Sender<()>,
}

impl RulesWatcher {
    /// Starts watching the store's file. The parent directory is watched so
    /// atomic replace-by-rename writes are seen.
    pub fn start(
        store: Arc<RuleStore>,
        coordinator: Arc<Coordinator>,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let path = store.path().to_path_buf();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = event_tx.blocking_send(event);
                }
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching rules file {}", path.display());

        tokio::spawn(async move {
            let mut pending: Option<tokio::time::Instant> = None;
            loop {
                tokio::select! {
                    Some(event) = event_rx.recv() => {
                        if is_relevant(&event, &path) {
                            debug!("Rules file change detected: {:?}", event.kind);
                            pending = Some(tokio::time::Instant::now());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Rules watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if pending.is_some_and(|t| t.elapsed() >= debounce) {
                            pending = None;
                            reload(&store, &coordinator).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            _shutdown_tx: shutdown_tx,
        })
    }
}

async fn reload(store: &RuleStore, coordinator: &Coordinator) {
    match store.reload().await {
        Ok(rules) => {
            if let Err(e) = coordinator.on_rules_changed(rules).await {
                error!("Failed to reconcile after rules file change: {}", e);
            }
        }
        Err(e) => error!("Failed to reload rules file: {}", e),
    }
}

fn is_relevant(event: &Event, rules_file: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == rules_file.file_name())
}
