//! Request/response bridge to the extension over native messaging.
//!
//! Outbound requests are queued on a channel drained by the stdout writer;
//! replies arrive through [`NativeBridge::resolve`] from the stdin reader and
//! are matched to the waiting caller by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::PageError;
use crate::page::{PageContext, ScriptInvocation, ScriptOutcome, Tab, TabId, TabSource, TimerId};
use crate::protocol::{Outbound, PageOp};

type Reply = Result<Value, String>;

pub struct NativeBridge {
    tx: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    timeout: Duration,
}

impl NativeBridge {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>, timeout: Duration) -> Self {
        Self {
            tx,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Completes the request `id` with the extension's reply.
    pub fn resolve(&self, id: u64, ok: bool, result: Value, error: Option<String>) {
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let reply = if ok {
                    Ok(result)
                } else {
                    Err(error.unwrap_or_else(|| "unknown error".to_string()))
                };
                let _ = tx.send(reply);
            }
            None => warn!("Response for unknown or expired request {}", id),
        }
    }

    /// Fails every in-flight request, e.g. when stdin closes.
    pub fn disconnect(&self) {
        self.pending.lock().clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    async fn request(&self, op: PageOp) -> Result<Value, PageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tab = op.tab_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        trace!("Request {} -> {:?}", id, op);
        if self.tx.send(Outbound::Request { id, op }).is_err() {
            self.pending.lock().remove(&id);
            return Err(PageError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(match tab {
                Some(tab) if is_gone(&message) => PageError::TabClosed(tab),
                Some(tab) => PageError::Injection { tab, message },
                None => PageError::InvalidResponse(message),
            }),
            Ok(Err(_)) => Err(PageError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(PageError::Timeout(id))
            }
        }
    }

    async fn request_as<T: DeserializeOwned>(&self, op: PageOp) -> Result<T, PageError> {
        let value = self.request(op).await?;
        serde_json::from_value(value).map_err(|e| PageError::InvalidResponse(e.to_string()))
    }
}

/// Error strings the browser uses for tabs that vanished mid-call.
fn is_gone(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no tab with id") || lower.contains("frame with id") || lower.contains("tab was closed")
}

#[async_trait]
impl PageContext for NativeBridge {
    async fn original_title(&self, tab: TabId) -> Result<String, PageError> {
        self.request_as(PageOp::ReadOriginalTitle { tab_id: tab }).await
    }

    async fn set_title(&self, tab: TabId, title: &str) -> Result<(), PageError> {
        self.request(PageOp::SetTitle {
            tab_id: tab,
            title: title.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn run_title_script(
        &self,
        tab: TabId,
        script: &ScriptInvocation,
    ) -> Result<ScriptOutcome, PageError> {
        self.request_as(PageOp::RunTitleScript {
            tab_id: tab,
            script: script.source.clone(),
            interval: script.interval_secs,
        })
        .await
    }

    async fn stop_timer(&self, tab: TabId, timer: TimerId) -> Result<(), PageError> {
        self.request(PageOp::StopTimer {
            tab_id: tab,
            timer_id: timer,
        })
        .await
        .map(|_| ())
    }

    async fn restore_title(&self, tab: TabId) -> Result<(), PageError> {
        self.request(PageOp::RestoreTitle { tab_id: tab }).await.map(|_| ())
    }
}

#[async_trait]
impl TabSource for NativeBridge {
    async fn list_tabs(&self) -> Result<Vec<Tab>, PageError> {
        self.request_as(PageOp::QueryTabs).await
    }
}
