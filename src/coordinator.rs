//! Keeps every open tab's title consistent with the current rule set.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::applier::{ApplyOutcome, TabRuleApplier};
use crate::diff::diff;
use crate::error::PageError;
use crate::page::{PageContext, Tab, TabId, TabSource, TimerId};
use crate::rule::Rule;

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Eligible (http/https) tabs seen.
    pub processed_tabs: usize,
    pub cleared: usize,
    pub applied: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn tally(&mut self, outcomes: &[ApplyOutcome]) {
        for outcome in outcomes {
            match outcome {
                ApplyOutcome::Applied(_) => self.applied += 1,
                ApplyOutcome::Failed => self.failed += 1,
                _ => {}
            }
        }
    }
}

/// Owns the current rule set. Tab events hold its read side while they run,
/// and rule changes hold the write side for the whole reconciliation, so a
/// tab event never applies a rule set that a finished change replaced.
pub struct Coordinator {
    applier: TabRuleApplier,
    tabs: Arc<dyn TabSource>,
    rules: RwLock<Vec<Rule>>,
}

impl Coordinator {
    pub fn new(page: Arc<dyn PageContext>, tabs: Arc<dyn TabSource>) -> Self {
        Self {
            applier: TabRuleApplier::new(page),
            tabs,
            rules: RwLock::new(Vec::new()),
        }
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    pub fn active_rule(&self, tab: TabId) -> Option<Rule> {
        self.applier.active_rule(tab)
    }

    pub fn applier(&self) -> &TabRuleApplier {
        &self.applier
    }

    /// A tab finished loading. Only http(s) pages are evaluated, but any
    /// stale entry from the previous page is dropped either way.
    pub async fn on_tab_updated(&self, tab: &Tab) -> ApplyOutcome {
        let rules = self.rules.read().await;
        self.applier.navigated(&rules, tab).await
    }

    pub async fn on_tab_removed(&self, tab: TabId) {
        self.applier.tab_removed(tab).await;
    }

    pub async fn on_script_failed(&self, tab: TabId, timer: TimerId, error: &str) {
        self.applier.script_failed(tab, timer, error).await;
    }

    /// Installs a new rule set and reconciles the tabs it affects.
    ///
    /// Tabs whose active rule was removed or modified are cleared first. Only
    /// once every clear has finished are the cleared tabs, and the tabs whose
    /// domain gained a rule, re-evaluated against the full new list.
    ///
    /// If the tabs cannot be listed the previous rule set stays installed, so
    /// a retry sees the same changes again.
    pub async fn on_rules_changed(&self, rules: Vec<Rule>) -> Result<ReconcileReport, PageError> {
        let mut current = self.rules.write().await;

        let changes = diff(&current, &rules);
        if changes.is_empty() {
            debug!("Rule set unchanged, nothing to reconcile");
            return Ok(ReconcileReport::default());
        }
        info!(
            "Rule set changed: {} removed, {} added",
            changes.removed.len(),
            changes.added.len()
        );

        let tabs = self.eligible_tabs().await?;
        *current = rules.clone();
        let mut report = ReconcileReport {
            processed_tabs: tabs.len(),
            ..ReconcileReport::default()
        };

        let stale: Vec<&Tab> = tabs
            .iter()
            .filter(|t| {
                self.applier
                    .active_rule(t.id)
                    .is_some_and(|r| changes.was_removed(&r.id))
            })
            .collect();
        let cleared: HashSet<TabId> = join_all(stale.iter().map(|t| async move {
            self.applier.clear(t.id).await.then_some(t.id)
        }))
        .await
        .into_iter()
        .flatten()
        .collect();
        report.cleared = cleared.len();

        let outcomes = join_all(
            tabs.iter()
                .filter(|t| {
                    cleared.contains(&t.id)
                        || t.domain().is_some_and(|d| changes.adds_domain(&d))
                })
                .map(|t| self.applier.apply(&rules, t)),
        )
        .await;
        report.tally(&outcomes);

        info!("Reconciled rule change: {:?}", report);
        Ok(report)
    }

    /// Forced re-evaluation of every open tab against `rules`.
    ///
    /// Every active tab is cleared before any rule is applied again. Entries
    /// for tabs the browser no longer lists are dropped.
    pub async fn reconcile_all(&self, rules: Vec<Rule>) -> Result<ReconcileReport, PageError> {
        let mut current = self.rules.write().await;
        let all_tabs = self.tabs.list_tabs().await?;
        *current = rules.clone();

        let open: HashSet<TabId> = all_tabs.iter().map(|t| t.id).collect();
        for gone in self.applier.active_tabs().into_iter().filter(|id| !open.contains(id)) {
            self.applier.tab_removed(gone).await;
        }

        let tabs: Vec<Tab> = all_tabs.into_iter().filter(Tab::is_eligible).collect();
        let mut report = ReconcileReport {
            processed_tabs: tabs.len(),
            ..ReconcileReport::default()
        };

        report.cleared = join_all(tabs.iter().map(|t| self.applier.clear(t.id)))
            .await
            .into_iter()
            .filter(|cleared| *cleared)
            .count();

        let outcomes = join_all(tabs.iter().map(|t| self.applier.apply(&rules, t))).await;
        report.tally(&outcomes);

        info!("Forced reconciliation finished: {:?}", report);
        Ok(report)
    }

    async fn eligible_tabs(&self) -> Result<Vec<Tab>, PageError> {
        match self.tabs.list_tabs().await {
            Ok(tabs) => Ok(tabs.into_iter().filter(Tab::is_eligible).collect()),
            Err(e) => {
                warn!("Failed to enumerate tabs: {}", e);
                Err(e)
            }
        }
    }
}
