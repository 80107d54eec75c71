//! Per-tab rule application.
//!
//! [`TabRuleApplier`] owns the tab → active rule map, the only shared mutable
//! state in the engine. Each tab moves between two states:
//!
//! ```text
//!            apply (first matching rule)
//!  Inactive ─────────────────────────────► Active(rule)
//!     ▲                                        │
//!     └──── clear / superseded / failure ──────┘
//! ```
//!
//! Operations on the same tab are serialized through a per-tab async lock, so
//! a later event always observes the effects of an earlier one. Operations on
//! different tabs run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::page::{PageContext, ScriptInvocation, ScriptOutcome, Tab, TabId, TimerId, TitleTimer};
use crate::rule::{Rule, TitleMode};

/// What an apply step did to a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The rule with this id now governs the tab.
    Applied(String),
    /// The winning rule was already active with identical content.
    Unchanged(String),
    /// Rules exist for the tab's domain but none matched.
    NoMatch,
    /// Not an http(s) page, or no rule targets its domain. The page was not touched.
    Skipped,
    /// A page operation failed; the tab was left without an active rule.
    Failed,
}

struct Activation {
    rule: Rule,
    timer: Option<TitleTimer>,
}

pub struct TabRuleApplier {
    page: Arc<dyn PageContext>,
    active: RwLock<HashMap<TabId, Activation>>,
    locks: Mutex<HashMap<TabId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TabRuleApplier {
    pub fn new(page: Arc<dyn PageContext>) -> Self {
        Self {
            page,
            active: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The rule currently governing `tab`, if any.
    pub fn active_rule(&self, tab: TabId) -> Option<Rule> {
        self.active.read().get(&tab).map(|a| a.rule.clone())
    }

    /// Timer currently owned by the tab's activation.
    pub fn active_timer(&self, tab: TabId) -> Option<TimerId> {
        self.active
            .read()
            .get(&tab)
            .and_then(|a| a.timer.as_ref().map(TitleTimer::id))
    }

    pub fn active_tabs(&self) -> Vec<TabId> {
        self.active.read().keys().copied().collect()
    }

    fn tab_lock(&self, tab: TabId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(tab).or_default().clone()
    }

    /// Applies the first rule in `rules`, in list order, that matches `tab`.
    pub async fn apply(&self, rules: &[Rule], tab: &Tab) -> ApplyOutcome {
        let lock = self.tab_lock(tab.id);
        let _guard = lock.lock().await;
        self.apply_locked(rules, tab).await
    }

    /// Re-evaluates a tab that just finished loading a new page.
    ///
    /// The reload destroyed the old page's timer and stash, so the previous
    /// activation is dropped without touching the page.
    pub async fn navigated(&self, rules: &[Rule], tab: &Tab) -> ApplyOutcome {
        let lock = self.tab_lock(tab.id);
        let _guard = lock.lock().await;
        self.discard(tab.id);
        self.apply_locked(rules, tab).await
    }

    /// Deactivates the tab's rule: stops its timer and restores the original
    /// title. Returns false when no rule was active.
    pub async fn clear(&self, tab: TabId) -> bool {
        let lock = self.tab_lock(tab);
        let _guard = lock.lock().await;
        self.deactivate(tab).await
    }

    /// Forgets a closed tab. The page is gone, so nothing is sent to it.
    pub async fn tab_removed(&self, tab: TabId) {
        let lock = self.tab_lock(tab);
        {
            let _guard = lock.lock().await;
            if self.discard(tab) {
                debug!("Tab {} closed, dropped its active rule", tab);
            }
        }
        self.locks.lock().remove(&tab);
    }

    /// The page stopped a generator timer on its own after a failed run. The
    /// rule stays active and the tab keeps its last good title.
    pub async fn script_failed(&self, tab: TabId, timer: TimerId, error: &str) {
        let lock = self.tab_lock(tab);
        let _guard = lock.lock().await;
        let mut active = self.active.write();
        match active.get_mut(&tab) {
            Some(activation) if activation.timer.as_ref().map(TitleTimer::id) == Some(timer) => {
                warn!(
                    "Title script of rule {} stopped on tab {}: {}",
                    activation.rule.id, tab, error
                );
                if let Some(t) = activation.timer.take() {
                    t.forget();
                }
            }
            _ => debug!("Ignoring failure report for stale timer {} on tab {}", timer, tab),
        }
    }

    async fn apply_locked(&self, rules: &[Rule], tab: &Tab) -> ApplyOutcome {
        if !tab.is_eligible() {
            return ApplyOutcome::Skipped;
        }
        let Some(domain) = tab.domain() else {
            return ApplyOutcome::Skipped;
        };
        if !rules.iter().any(|r| r.domain == domain) {
            return ApplyOutcome::Skipped;
        }

        let original = match self.page.original_title(tab.id).await {
            Ok(title) => title,
            Err(e) => {
                warn!("Failed to read original title of tab {}: {}", tab.id, e);
                self.discard(tab.id);
                return ApplyOutcome::Failed;
            }
        };

        let Some(rule) = rules.iter().find(|r| r.matches(&tab.url, &original)) else {
            debug!("No rule matched tab {} ({:?})", tab.id, original);
            return ApplyOutcome::NoMatch;
        };

        let current = self.active_rule(tab.id);
        if current.as_ref() == Some(rule) {
            return ApplyOutcome::Unchanged(rule.id.clone());
        }
        if let Some(previous) = current {
            debug!("Rule {} on tab {} superseded by {}", previous.id, tab.id, rule.id);
            self.deactivate(tab.id).await;
        }

        self.activate(rule, tab.id).await
    }

    async fn activate(&self, rule: &Rule, tab: TabId) -> ApplyOutcome {
        let result = match rule.apply_rules.mode() {
            Some(TitleMode::Fixed(title)) => {
                debug!("Tab {}: fixed title {:?} from rule {}", tab, title, rule.id);
                self.page.set_title(tab, title).await.map(|()| None)
            }
            Some(TitleMode::Script { source, interval_secs }) => {
                debug!("Tab {}: title script from rule {}", tab, rule.id);
                let invocation = ScriptInvocation {
                    source: source.to_string(),
                    interval_secs,
                };
                self.page
                    .run_title_script(tab, &invocation)
                    .await
                    .map(|outcome| match outcome {
                        ScriptOutcome::Applied { timer_id, .. } => {
                            timer_id.map(|id| TitleTimer::new(tab, id))
                        }
                        ScriptOutcome::Rejected { reason } => {
                            warn!("Title script of rule {} rejected on tab {}: {}", rule.id, tab, reason);
                            None
                        }
                    })
            }
            None => {
                warn!("Rule {} has neither a fixed title nor a script", rule.id);
                return ApplyOutcome::Skipped;
            }
        };

        match result {
            Ok(timer) => {
                info!("Applied rule {} to tab {}", rule.id, tab);
                self.active.write().insert(
                    tab,
                    Activation {
                        rule: rule.clone(),
                        timer,
                    },
                );
                ApplyOutcome::Applied(rule.id.clone())
            }
            Err(e) => {
                warn!("Failed to apply rule {} to tab {}: {}", rule.id, tab, e);
                self.discard(tab);
                ApplyOutcome::Failed
            }
        }
    }

    async fn deactivate(&self, tab: TabId) -> bool {
        let removed = self.active.write().remove(&tab);
        let Some(activation) = removed else {
            return false;
        };

        if let Some(timer) = activation.timer {
            if let Err(e) = timer.release(self.page.as_ref()).await {
                warn!("{}", e);
            }
        }
        if let Err(e) = self.page.restore_title(tab).await {
            warn!("Failed to restore title of tab {}: {}", tab, e);
        }
        debug!("Cleared rule {} from tab {}", activation.rule.id, tab);
        true
    }

    /// Drops the tab's entry without talking to the page.
    fn discard(&self, tab: TabId) -> bool {
        let removed = self.active.write().remove(&tab);
        match removed {
            Some(activation) => {
                if let Some(timer) = activation.timer {
                    timer.forget();
                }
                true
            }
            None => false,
        }
    }
}
