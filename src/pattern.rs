//! Text patterns used to match tab titles and URLs.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single text pattern: literal substring, whole-string literal, or regex.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Pattern {
    pub pattern: String,
    pub case_sensitive: bool,
    pub is_regex: bool,
    pub whole_word: bool,
    #[serde(skip)]
    compiled: OnceLock<CompiledRegex>,
}

/// A compiled regex together with the source it was built from, so a cache
/// filled before the public fields changed is detected and bypassed.
#[derive(Debug, Clone)]
struct CompiledRegex {
    source: String,
    regex: Option<Regex>,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.case_sensitive == other.case_sensitive
            && self.is_regex == other.is_regex
            && self.whole_word == other.whole_word
    }
}

impl Eq for Pattern {}

impl Pattern {
    /// Plain case-insensitive substring pattern.
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive regular expression.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_regex: true,
            ..Self::default()
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn whole_word(mut self, yes: bool) -> Self {
        self.whole_word = yes;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Tests `text` against this pattern.
    ///
    /// An empty pattern places no constraint and always matches. Unless the
    /// pattern is case-sensitive, text and pattern are both lower-cased first,
    /// regex sources included, and regexes also get the case-insensitive flag.
    /// A regex that fails to compile never matches. `whole_word` means the
    /// whole text must equal the pattern, not that the pattern appears on
    /// word boundaries.
    pub fn matches(&self, text: &str) -> bool {
        if self.pattern.is_empty() {
            return true;
        }

        let (text, pattern) = if self.case_sensitive {
            (text.to_string(), self.pattern.clone())
        } else {
            (text.to_lowercase(), self.pattern.to_lowercase())
        };

        if self.is_regex {
            return self.with_regex(pattern, |re| re.is_match(&text));
        }
        Self::compare(&text, &pattern, self.whole_word)
    }

    fn with_regex(&self, source: String, f: impl FnOnce(&Regex) -> bool) -> bool {
        let case_insensitive = !self.case_sensitive;
        let compile = |source: &str| match RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Ignoring invalid pattern {:?}: {}", self.pattern, e);
                None
            }
        };

        let key = format!("{}:{}", case_insensitive, source);
        let cached = self.compiled.get_or_init(|| CompiledRegex {
            source: key.clone(),
            regex: compile(&source),
        });
        if cached.source == key {
            return cached.regex.as_ref().is_some_and(f);
        }
        // Fields were changed after the first match; don't trust the cache.
        compile(&source).as_ref().is_some_and(f)
    }

    fn compare(text: &str, pattern: &str, whole_word: bool) -> bool {
        if whole_word {
            text == pattern
        } else {
            text.contains(pattern)
        }
    }
}
