use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Port of the local control API.
    pub port: u16,
    /// Rules file; relative paths resolve against the config directory.
    pub rules_file: String,
    pub request_timeout_secs: u64,
    pub watch_debounce_ms: u64,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 58422,
            rules_file: "rules.json".to_string(),
            request_timeout_secs: 10,
            watch_debounce_ms: 500,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn rules_path(&self, config_dir: &Path) -> PathBuf {
        let path = PathBuf::from(&self.rules_file);
        if path.is_absolute() {
            path
        } else {
            config_dir.join(path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoHomeDir)?;
    let mut path = PathBuf::from(home);
    path.push(".tab-retitle");
    Ok(path)
}

/// Loads `config.toml` from `dir`, writing the defaults when it is missing.
/// A file that fails to parse is reported and replaced by defaults in memory.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    let path = dir.join("config.toml");

    if path.exists() {
        let content = fs::read_to_string(&path)?;
        Ok(toml::from_str(&content).unwrap_or_else(|e| {
            warn!("Error parsing {}: {}. Using defaults.", path.display(), e);
            Config::default()
        }))
    } else {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        fs::write(path, content)?;
        Ok(config)
    }
}
