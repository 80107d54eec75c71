//! Per-domain tab title rewriting, run as a browser native-messaging host.
//!
//! The browser extension forwards tab events to this host and executes the
//! page-context operations the host asks for. The host decides which rule, if
//! any, governs each tab's title.
//!
//! ```text
//! rules file ──► RuleStore ──► Coordinator ──► diff ──► TabRuleApplier ──► PageContext
//!                                   ▲                                         │
//!             tab events (stdin) ───┘             requests (stdout) ◄─────────┘
//! ```

pub mod applier;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod host;
pub mod page;
pub mod pattern;
pub mod protocol;
pub mod rule;
pub mod server;
pub mod state;
pub mod store;
pub mod templates;
pub mod watcher;

pub use applier::{ApplyOutcome, TabRuleApplier};
pub use coordinator::{Coordinator, ReconcileReport};
pub use diff::{RuleSetDiff, diff};
pub use error::{PageError, StoreError, ValidationError};
pub use page::{PageContext, ScriptInvocation, ScriptOutcome, Tab, TabId, TabSource, TimerId};
pub use pattern::Pattern;
pub use rule::{ApplyAction, MatchRules, Rule};
