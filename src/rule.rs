//! Title rules: domain scope, match condition and apply action.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;
use crate::pattern::Pattern;

/// Optional title and URL filters. A missing or empty pattern is not checked.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchRules {
    pub title_pattern: Option<Pattern>,
    pub url_pattern: Option<Pattern>,
}

impl MatchRules {
    pub fn matches(&self, url: &str, title: &str) -> bool {
        if let Some(p) = &self.title_pattern {
            if !p.is_empty() && !p.matches(title) {
                return false;
            }
        }
        if let Some(p) = &self.url_pattern {
            if !p.is_empty() && !p.matches(url) {
                return false;
            }
        }
        true
    }

    /// True when at least one of the two patterns carries text.
    pub fn has_pattern(&self) -> bool {
        [&self.title_pattern, &self.url_pattern]
            .into_iter()
            .flatten()
            .any(|p| !p.is_empty())
    }
}

/// What a rule does to the title once it matches.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyAction {
    pub fixed_title: String,
    pub title_script: Option<String>,
    /// Seconds between generator runs; 0 runs it once.
    pub interval: i64,
}

/// The active mode of an [`ApplyAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleMode<'a> {
    Fixed(&'a str),
    Script { source: &'a str, interval_secs: u64 },
}

impl ApplyAction {
    pub fn fixed(title: impl Into<String>) -> Self {
        Self {
            fixed_title: title.into(),
            ..Self::default()
        }
    }

    pub fn script(source: impl Into<String>, interval: i64) -> Self {
        Self {
            fixed_title: String::new(),
            title_script: Some(source.into()),
            interval,
        }
    }

    /// A non-empty fixed title takes precedence over a script.
    pub fn mode(&self) -> Option<TitleMode<'_>> {
        if !self.fixed_title.is_empty() {
            return Some(TitleMode::Fixed(&self.fixed_title));
        }
        match self.title_script.as_deref() {
            Some(source) if !source.trim().is_empty() => Some(TitleMode::Script {
                source,
                interval_secs: u64::try_from(self.interval).unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// A per-domain title rewrite rule, as stored by the options UI.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub match_rules: MatchRules,
    #[serde(default)]
    pub apply_rules: ApplyAction,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

fn enabled_by_default() -> bool {
    true
}

/// Hostname of `url`, or `None` when it cannot be parsed or has no host.
pub fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

impl Rule {
    pub fn new(id: impl Into<String>, domain: impl Into<String>, apply_rules: ApplyAction) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            enabled: true,
            tags: Vec::new(),
            match_rules: MatchRules::default(),
            apply_rules,
            create_time: 0,
            update_time: 0,
        }
    }

    pub fn with_title_pattern(mut self, pattern: Pattern) -> Self {
        self.match_rules.title_pattern = Some(pattern);
        self
    }

    pub fn with_url_pattern(mut self, pattern: Pattern) -> Self {
        self.match_rules.url_pattern = Some(pattern);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this rule governs a tab at `url` whose original title is `title`.
    pub fn matches(&self, url: &str, title: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match hostname(url) {
            Some(host) if host == self.domain => self.match_rules.matches(url, title),
            _ => false,
        }
    }

    /// The title a fixed-title rule produces. Script rules generate their
    /// title inside the page, so they yield `None` here.
    pub fn apply(&self, _original_title: &str) -> Option<String> {
        match self.apply_rules.mode() {
            Some(TitleMode::Fixed(title)) => Some(title.to_string()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.domain.is_empty() {
            return Err(ValidationError::MissingDomain);
        }
        if !self.match_rules.has_pattern() {
            return Err(ValidationError::MissingPattern);
        }
        let action = &self.apply_rules;
        let has_script = action
            .title_script
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if action.fixed_title.is_empty() && !has_script {
            return Err(ValidationError::MissingAction);
        }
        if action.interval < 0 {
            return Err(ValidationError::NegativeInterval(action.interval));
        }
        Ok(())
    }
}
