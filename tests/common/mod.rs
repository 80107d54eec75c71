//! In-memory browser used by the integration tests.
//!
//! Title generators are registered as Rust closures keyed by their script
//! source, standing in for the page's JavaScript.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use tab_retitle::protocol::PageOp;
use tab_retitle::{
    ApplyAction, PageContext, PageError, Pattern, Rule, ScriptInvocation, ScriptOutcome, Tab,
    TabId, TabSource, TimerId,
};

/// `(original_title, call_index) -> Some(title)`, or `None` for a run that
/// throws or returns a non-string.
pub type Generator = Box<dyn Fn(&str, u32) -> Option<String> + Send>;

#[derive(Debug, Clone, Default)]
pub struct FakeTab {
    pub url: String,
    pub title: String,
    pub stash: Option<String>,
    pub timer: Option<RunningTimer>,
}

#[derive(Debug, Clone)]
pub struct RunningTimer {
    pub id: TimerId,
    pub script: String,
    pub calls: u32,
    pub interval_secs: u64,
}

#[derive(Default)]
struct Inner {
    tabs: BTreeMap<TabId, FakeTab>,
    generators: HashMap<String, Generator>,
    failing: HashSet<TabId>,
    next_timer: TimerId,
    ops: Vec<String>,
    timers_started: u32,
    timers_stopped: u32,
    title_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
pub struct FakeBrowser {
    inner: Mutex<Inner>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self, id: TabId, url: &str, title: &str) {
        self.inner.lock().unwrap().tabs.insert(
            id,
            FakeTab {
                url: url.to_string(),
                title: title.to_string(),
                ..FakeTab::default()
            },
        );
    }

    /// A full page load: stash and timer die with the old page.
    pub fn navigate(&self, id: TabId, url: &str, title: &str) {
        self.open(id, url, title);
    }

    pub fn close(&self, id: TabId) {
        self.inner.lock().unwrap().tabs.remove(&id);
    }

    pub fn fail_injections(&self, id: TabId) {
        self.inner.lock().unwrap().failing.insert(id);
    }

    /// The next `original_title` call waits until the returned gate is
    /// notified, leaving that tab operation in flight.
    pub fn gate_original_title(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.lock().unwrap().title_gate = Some(gate.clone());
        gate
    }

    pub fn register(&self, script: &str, generator: Generator) {
        self.inner
            .lock()
            .unwrap()
            .generators
            .insert(script.to_string(), generator);
    }

    pub fn tab(&self, id: TabId) -> Tab {
        let inner = self.inner.lock().unwrap();
        let t = &inner.tabs[&id];
        Tab::new(id, t.url.clone(), t.title.clone())
    }

    pub fn title(&self, id: TabId) -> String {
        self.inner.lock().unwrap().tabs[&id].title.clone()
    }

    pub fn stash(&self, id: TabId) -> Option<String> {
        self.inner.lock().unwrap().tabs[&id].stash.clone()
    }

    pub fn timer(&self, id: TabId) -> Option<RunningTimer> {
        self.inner.lock().unwrap().tabs[&id].timer.clone()
    }

    pub fn running_timers(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tabs.values().filter(|t| t.timer.is_some()).count()
    }

    pub fn timers_started(&self) -> u32 {
        self.inner.lock().unwrap().timers_started
    }

    pub fn timers_stopped(&self) -> u32 {
        self.inner.lock().unwrap().timers_stopped
    }

    pub fn ops(&self) -> Vec<String> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().unwrap().ops.clear();
    }

    /// Fires the tab's page timer once. On a failed run the page stops the
    /// timer itself and the id is returned so the test can report it.
    pub fn tick(&self, id: TabId) -> Result<(), TimerId> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { tabs, generators, timers_stopped, .. } = &mut *inner;
        let tab = tabs.get_mut(&id).expect("tab is open");
        let Some(timer) = tab.timer.as_mut() else {
            return Ok(());
        };
        timer.calls += 1;
        let original = match &tab.stash {
            Some(stash) => stash.clone(),
            None => tab.title.clone(),
        };
        let result = generators
            .get(&timer.script)
            .and_then(|g| g(&original, timer.calls));
        match result {
            Some(title) => {
                tab.title = title;
                Ok(())
            }
            None => {
                let stopped = timer.id;
                tab.timer = None;
                *timers_stopped += 1;
                Err(stopped)
            }
        }
    }

    fn enter(&self, op: &str, id: TabId) -> Result<std::sync::MutexGuard<'_, Inner>, PageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ops.push(format!("{}:{}", op, id));
        if !inner.tabs.contains_key(&id) {
            return Err(PageError::TabClosed(id));
        }
        if inner.failing.contains(&id) {
            return Err(PageError::Injection {
                tab: id,
                message: "Cannot access contents of the page".to_string(),
            });
        }
        Ok(inner)
    }
}

#[async_trait]
impl PageContext for FakeBrowser {
    async fn original_title(&self, tab: TabId) -> Result<String, PageError> {
        let gate = self.enter("original_title", tab)?.title_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(t) = inner.tabs.get_mut(&tab) else {
            return Err(PageError::TabClosed(tab));
        };
        if t.stash.is_none() {
            t.stash = Some(t.title.clone());
        }
        Ok(t.stash.clone().unwrap_or_default())
    }

    async fn set_title(&self, tab: TabId, title: &str) -> Result<(), PageError> {
        let mut inner = self.enter("set_title", tab)?;
        let t = inner.tabs.get_mut(&tab).expect("checked in enter");
        if t.stash.is_none() {
            t.stash = Some(t.title.clone());
        }
        t.title = title.to_string();
        Ok(())
    }

    async fn run_title_script(
        &self,
        tab: TabId,
        script: &ScriptInvocation,
    ) -> Result<ScriptOutcome, PageError> {
        let mut guard = self.enter("run_title_script", tab)?;
        let inner = &mut *guard;
        let t = inner.tabs.get_mut(&tab).expect("checked in enter");
        let original = t.stash.clone().unwrap_or_else(|| t.title.clone());
        let Some(generator) = inner.generators.get(&script.source) else {
            return Ok(ScriptOutcome::Rejected {
                reason: "script is not a function".to_string(),
            });
        };
        let Some(title) = generator(&original, 0) else {
            return Ok(ScriptOutcome::Rejected {
                reason: "generator did not return a string".to_string(),
            });
        };

        t.stash = Some(original);
        t.title = title.clone();
        let timer_id = if script.interval_secs > 0 {
            inner.next_timer += 1;
            inner.timers_started += 1;
            t.timer = Some(RunningTimer {
                id: inner.next_timer,
                script: script.source.clone(),
                calls: 0,
                interval_secs: script.interval_secs,
            });
            Some(inner.next_timer)
        } else {
            None
        };
        Ok(ScriptOutcome::Applied { title, timer_id })
    }

    async fn stop_timer(&self, tab: TabId, timer: TimerId) -> Result<(), PageError> {
        let mut guard = self.enter("stop_timer", tab)?;
        let inner = &mut *guard;
        let t = inner.tabs.get_mut(&tab).expect("checked in enter");
        if t.timer.as_ref().is_some_and(|r| r.id == timer) {
            t.timer = None;
            inner.timers_stopped += 1;
        }
        Ok(())
    }

    async fn restore_title(&self, tab: TabId) -> Result<(), PageError> {
        let mut inner = self.enter("restore_title", tab)?;
        let t = inner.tabs.get_mut(&tab).expect("checked in enter");
        if let Some(original) = t.stash.take() {
            t.title = original;
        }
        Ok(())
    }
}

#[async_trait]
impl TabSource for FakeBrowser {
    async fn list_tabs(&self) -> Result<Vec<Tab>, PageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tabs
            .iter()
            .map(|(id, t)| Tab::new(*id, t.url.clone(), t.title.clone()))
            .collect())
    }
}

/// Answers a host request the way the extension would.
pub async fn answer(browser: &FakeBrowser, op: PageOp) -> Result<Value, String> {
    let result = match op {
        PageOp::QueryTabs => browser.list_tabs().await.map(|tabs| json!(tabs)),
        PageOp::ReadOriginalTitle { tab_id } => browser.original_title(tab_id).await.map(|t| json!(t)),
        PageOp::SetTitle { tab_id, title } => browser.set_title(tab_id, &title).await.map(|()| Value::Null),
        PageOp::RunTitleScript { tab_id, script, interval } => {
            let invocation = ScriptInvocation { source: script, interval_secs: interval };
            browser
                .run_title_script(tab_id, &invocation)
                .await
                .map(|outcome| json!(outcome))
        }
        PageOp::StopTimer { tab_id, timer_id } => {
            browser.stop_timer(tab_id, timer_id).await.map(|()| Value::Null)
        }
        PageOp::RestoreTitle { tab_id } => browser.restore_title(tab_id).await.map(|()| Value::Null),
    };
    result.map_err(|e| match e {
        PageError::TabClosed(id) => format!("No tab with id: {}.", id),
        other => other.to_string(),
    })
}

pub fn fixed_rule(id: &str, domain: &str, title: &str) -> Rule {
    Rule::new(id, domain, ApplyAction::fixed(title))
        .with_title_pattern(Pattern::default())
        .with_url_pattern(Pattern::default())
}

pub fn script_rule(id: &str, domain: &str, script: &str, interval: i64) -> Rule {
    Rule::new(id, domain, ApplyAction::script(script, interval))
        .with_title_pattern(Pattern::default())
        .with_url_pattern(Pattern::default())
}
