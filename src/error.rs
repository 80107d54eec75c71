//! Error types.

use thiserror::Error;

use crate::page::{TabId, TimerId};

/// Failures raised while running code inside a tab's page context.
#[derive(Debug, Error)]
pub enum PageError {
    /// The tab is gone or navigated away while the operation was in flight.
    #[error("Tab {0} is no longer available")]
    TabClosed(TabId),

    /// The page refused the injected function.
    #[error("Injection into tab {tab} failed: {message}")]
    Injection { tab: TabId, message: String },

    #[error("Timed out waiting for the extension to answer request {0}")]
    Timeout(u64),

    #[error("Extension channel closed")]
    Disconnected,

    #[error("Invalid response from extension: {0}")]
    InvalidResponse(String),

    #[error("Timer {timer} on tab {tab} could not be stopped: {message}")]
    TimerRelease {
        tab: TabId,
        timer: TimerId,
        message: String,
    },
}

/// Reasons a rule is rejected before it is persisted or activated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Rule id is missing")]
    MissingId,

    #[error("Rule domain is missing")]
    MissingDomain,

    #[error("At least one of the title pattern or URL pattern must be set")]
    MissingPattern,

    #[error("Either a fixed title or a title script must be set")]
    MissingAction,

    #[error("Repeat interval must be zero or positive, got {0}")]
    NegativeInterval(i64),
}

/// Rule storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid rule: {0}")]
    Invalid(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rule file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME is not set; cannot locate the config directory")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Native-messaging framing errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message of {0} bytes exceeds the native messaging limit")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_error_mentions_tab() {
        let err = PageError::TabClosed(42);
        assert!(err.to_string().contains("42"));

        let err = PageError::Injection {
            tab: 7,
            message: "Cannot access contents of the page".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains('7'));
        assert!(display.contains("Cannot access"));
    }

    #[test]
    fn test_validation_error_reasons() {
        assert!(ValidationError::MissingDomain.to_string().contains("domain"));
        assert!(ValidationError::NegativeInterval(-3).to_string().contains("-3"));
    }

    #[test]
    fn test_store_error_from_validation() {
        let err = StoreError::from(ValidationError::MissingAction);
        assert!(matches!(err, StoreError::Invalid(ValidationError::MissingAction)));
        assert!(err.to_string().contains("fixed title"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::from(io_err);
        assert!(err.to_string().contains("file not found"));
    }
}
