//! The host loop, bridge and coordinator wired together against a simulated
//! extension that answers requests from the in-memory browser.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use common::{FakeBrowser, answer, fixed_rule};
use tab_retitle::bridge::NativeBridge;
use tab_retitle::coordinator::Coordinator;
use tab_retitle::host::Host;
use tab_retitle::protocol::{Inbound, Outbound};
use tab_retitle::store::RuleStore;

struct Session {
    _dir: TempDir,
    browser: Arc<FakeBrowser>,
    bridge: Arc<NativeBridge>,
    coordinator: Arc<Coordinator>,
    events: mpsc::UnboundedSender<Inbound>,
    host: JoinHandle<()>,
    extension: JoinHandle<()>,
}

async fn session(browser: Arc<FakeBrowser>) -> Session {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RuleStore::open(dir.path().join("rules.json")).await.unwrap());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
    let bridge = Arc::new(NativeBridge::new(out_tx, Duration::from_secs(2)));
    let coordinator = Arc::new(Coordinator::new(bridge.clone(), bridge.clone()));

    let page = browser.clone();
    let replies = in_tx.clone();
    let extension = tokio::spawn(async move {
        while let Some(Outbound::Request { id, op }) = out_rx.recv().await {
            let reply = match answer(&page, op).await {
                Ok(result) => Inbound::Response {
                    id,
                    ok: true,
                    result,
                    error: None,
                },
                Err(error) => Inbound::Response {
                    id,
                    ok: false,
                    result: serde_json::Value::Null,
                    error: Some(error),
                },
            };
            if replies.send(reply).is_err() {
                break;
            }
        }
    });

    let host = tokio::spawn(Host::new(bridge.clone(), coordinator.clone(), store).run(in_rx));

    Session {
        _dir: dir,
        browser,
        bridge,
        coordinator,
        events: in_tx,
        host,
        extension,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_rules_applied_through_the_bridge() {
    let browser = FakeBrowser::new();
    browser.open(1, "https://example.com/", "Hello");
    let s = session(browser).await;

    let report = s
        .coordinator
        .on_rules_changed(vec![fixed_rule("r1", "example.com", "Renamed")])
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(s.browser.title(1), "Renamed");
    assert_eq!(s.bridge.pending_requests(), 0);
}

#[tokio::test]
async fn test_tab_events_are_handled_in_order() {
    let browser = FakeBrowser::new();
    let s = session(browser).await;
    s.coordinator
        .on_rules_changed(vec![fixed_rule("r1", "example.com", "Renamed")])
        .await
        .unwrap();

    s.browser.open(5, "https://example.com/a", "A");
    s.events
        .send(Inbound::TabUpdated { tab: s.browser.tab(5) })
        .unwrap();
    let coordinator = s.coordinator.clone();
    wait_for(|| coordinator.active_rule(5).is_some()).await;
    assert_eq!(s.browser.title(5), "Renamed");

    s.browser.close(5);
    s.events.send(Inbound::TabRemoved { tab_id: 5 }).unwrap();
    let coordinator = s.coordinator.clone();
    wait_for(|| coordinator.active_rule(5).is_none()).await;
}

#[tokio::test]
async fn test_closed_tab_error_leaves_tab_inactive() {
    let browser = FakeBrowser::new();
    let s = session(browser).await;
    s.coordinator
        .on_rules_changed(vec![fixed_rule("r1", "example.com", "Renamed")])
        .await
        .unwrap();

    // The update races the tab's closure; the extension reports the tab gone.
    s.browser.open(9, "https://example.com/", "Soon gone");
    let tab = s.browser.tab(9);
    s.browser.close(9);
    let outcome = s.coordinator.on_tab_updated(&tab).await;

    assert_eq!(outcome, tab_retitle::ApplyOutcome::Failed);
    assert!(s.coordinator.active_rule(9).is_none());
}

#[tokio::test]
async fn test_host_stops_when_extension_disconnects() {
    let browser = FakeBrowser::new();
    let s = session(browser).await;

    s.extension.abort();
    drop(s.events);

    tokio::time::timeout(Duration::from_secs(2), s.host)
        .await
        .expect("host did not stop")
        .unwrap();
    assert_eq!(s.bridge.pending_requests(), 0);
}
