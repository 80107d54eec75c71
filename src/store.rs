//! File-backed rule collection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::rule::Rule;

/// Accepts either a bare array or a browser-storage export keyed by `titleRules`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Bare(Vec<Rule>),
    Keyed {
        #[serde(rename = "titleRules", default)]
        title_rules: Vec<Rule>,
    },
}

#[derive(Serialize)]
struct RuleFileOut<'a> {
    #[serde(rename = "titleRules")]
    title_rules: &'a [Rule],
}

/// Parses a rule file's contents. Empty content is an empty collection.
pub fn parse_rules(content: &str) -> Result<Vec<Rule>, StoreError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(match serde_json::from_str(content)? {
        RuleFile::Bare(rules) => rules,
        RuleFile::Keyed { title_rules } => title_rules,
    })
}

pub async fn read_rules(path: &Path) -> Result<Vec<Rule>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_rules(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// The ordered rule collection, persisted as JSON.
pub struct RuleStore {
    path: PathBuf,
    rules: RwLock<Vec<Rule>>,
}

impl RuleStore {
    /// Opens the store at `path`. A missing file is an empty collection.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rules = read_rules(&path).await?;
        info!("Loaded {} rules from {}", rules.len(), path.display());
        Ok(Self {
            path,
            rules: RwLock::new(rules),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn all(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Rule> {
        self.rules.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Re-reads the file, replacing the in-memory collection.
    pub async fn reload(&self) -> Result<Vec<Rule>, StoreError> {
        let rules = read_rules(&self.path).await?;
        *self.rules.write().await = rules.clone();
        debug!("Reloaded {} rules", rules.len());
        Ok(rules)
    }

    /// Validates and upserts a rule, keeping its position when it already
    /// exists. An empty id gets a fresh one; `updateTime` is stamped now.
    pub async fn save(&self, mut rule: Rule) -> Result<Rule, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        if rule.id.is_empty() {
            rule.id = uuid::Uuid::new_v4().to_string();
        }
        if rule.create_time == 0 {
            rule.create_time = now;
        }
        rule.update_time = now;
        rule.validate()?;

        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        match next.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => next.push(rule.clone()),
        }
        self.persist(&next).await?;
        *rules = next;
        info!("Saved rule {} for {}", rule.id, rule.domain);
        Ok(rule)
    }

    /// Removes a rule by id. Returns false if no such rule exists.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut rules = self.rules.write().await;
        let Some(index) = rules.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let mut next = rules.clone();
        next.remove(index);
        self.persist(&next).await?;
        *rules = next;
        info!("Deleted rule {}", id);
        Ok(true)
    }

    /// Flips a rule's `enabled` flag in place. The rest of the rule is kept
    /// as stored, so a rule that no longer validates can still be disabled.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Option<Rule>, StoreError> {
        let mut rules = self.rules.write().await;
        let Some(index) = rules.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let mut next = rules.clone();
        next[index].enabled = enabled;
        next[index].update_time = chrono::Utc::now().timestamp_millis();
        let toggled = next[index].clone();
        self.persist(&next).await?;
        *rules = next;
        info!("Rule {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(Some(toggled))
    }

    async fn persist(&self, rules: &[Rule]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(&RuleFileOut { title_rules: rules })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
