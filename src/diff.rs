//! Differences between two versions of the rule collection.

use crate::rule::Rule;

/// Rules that disappeared and rules that appeared between two collections.
///
/// A rule whose id survives but whose content changed shows up in both lists:
/// the old version in `removed`, the new one in `added`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetDiff {
    pub removed: Vec<Rule>,
    pub added: Vec<Rule>,
}

impl RuleSetDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn was_removed(&self, id: &str) -> bool {
        self.removed.iter().any(|r| r.id == id)
    }

    /// Whether any added rule is scoped to `domain`.
    pub fn adds_domain(&self, domain: &str) -> bool {
        self.added.iter().any(|r| r.domain == domain)
    }
}

/// Compares two rule collections by id, preserving each list's order.
pub fn diff(old: &[Rule], new: &[Rule]) -> RuleSetDiff {
    let removed = old
        .iter()
        .filter(|o| match new.iter().find(|n| n.id == o.id) {
            Some(n) => n != *o,
            None => true,
        })
        .cloned()
        .collect();

    let added = new
        .iter()
        .filter(|n| match old.iter().find(|o| o.id == n.id) {
            Some(o) => o != *n,
            None => true,
        })
        .cloned()
        .collect();

    RuleSetDiff { removed, added }
}
