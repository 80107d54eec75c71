//! Capabilities the browser offers to the engine: tab enumeration and running
//! small functions inside a tab's page.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PageError;
use crate::rule::hostname;

pub type TabId = i64;

/// Handle of a repeating timer living inside a page.
pub type TimerId = u64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl Tab {
    pub fn new(id: TabId, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: title.into(),
        }
    }

    /// Only http and https pages can have their title rewritten.
    pub fn is_eligible(&self) -> bool {
        Url::parse(&self.url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    pub fn domain(&self) -> Option<String> {
        hostname(&self.url)
    }
}

/// A user-supplied `(title) -> string` generator to run in the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub source: String,
    /// 0 runs the generator once.
    pub interval_secs: u64,
}

/// Result of the generator's first, immediate invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScriptOutcome {
    /// The generator returned a string and it is now the title.
    #[serde(rename_all = "camelCase")]
    Applied {
        title: String,
        timer_id: Option<TimerId>,
    },
    /// The generator threw or returned something other than a string. No
    /// timer was started and the title is unchanged.
    Rejected { reason: String },
}

/// Runs functions inside a tab's page context.
///
/// Every call is an async boundary. A tab that closes mid-call surfaces as a
/// [`PageError`], never a panic.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// The stashed original title, or the current title, which is then
    /// stashed so later lookups stay stable after the title is overwritten.
    async fn original_title(&self, tab: TabId) -> Result<String, PageError>;

    /// Sets the title, stashing the current one first if nothing is stashed.
    async fn set_title(&self, tab: TabId, title: &str) -> Result<(), PageError>;

    /// Parses and invokes a generator with the original title, and starts a
    /// page-owned timer when `interval_secs > 0` and the first run succeeded.
    async fn run_title_script(
        &self,
        tab: TabId,
        script: &ScriptInvocation,
    ) -> Result<ScriptOutcome, PageError>;

    async fn stop_timer(&self, tab: TabId, timer: TimerId) -> Result<(), PageError>;

    /// Puts the stashed original title back and drops the stash.
    async fn restore_title(&self, tab: TabId) -> Result<(), PageError>;
}

/// Enumerates the browser's open tabs.
#[async_trait]
pub trait TabSource: Send + Sync {
    async fn list_tabs(&self) -> Result<Vec<Tab>, PageError>;
}

/// A started page timer, owned by the activation that started it.
///
/// Released through [`TitleTimer::release`] on every deactivation path.
/// [`TitleTimer::forget`] is for timers the page already tore down itself.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a started timer must be released or forgotten"]
pub struct TitleTimer {
    tab: TabId,
    id: TimerId,
}

impl TitleTimer {
    pub fn new(tab: TabId, id: TimerId) -> Self {
        Self { tab, id }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub async fn release(self, page: &dyn PageContext) -> Result<(), PageError> {
        page.stop_timer(self.tab, self.id)
            .await
            .map_err(|e| PageError::TimerRelease {
                tab: self.tab,
                timer: self.id,
                message: e.to_string(),
            })
    }

    pub fn forget(self) {}
}
