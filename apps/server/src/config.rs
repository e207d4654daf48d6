//! Application configuration.

use pricewatch_alerts::WatcherConfig;
use pricewatch_core::{Exchange, WatchLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Polling loop settings.
    pub watcher: WatcherSettings,
    /// Bounds applied to new watches.
    pub limits: LimitSettings,
    /// Where the registry is persisted.
    pub storage: StorageSettings,
    /// Exchanges prices may be fetched from.
    pub exchanges: Vec<Exchange>,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watcher: WatcherSettings::default(),
            limits: LimitSettings::default(),
            storage: StorageSettings::default(),
            exchanges: Exchange::all().to_vec(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Watcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub poll_interval_secs: u64,
    /// Minimum price history kept per instrument.
    pub retention_window_secs: u64,
    /// Per-request timeout for exchange REST calls.
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            retention_window_secs: 3600,
            fetch_timeout_secs: 10,
            max_concurrent_fetches: 8,
        }
    }
}

impl WatcherSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        WatcherConfig {
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            retention_window: Duration::from_secs(settings.retention_window_secs),
            max_concurrent_fetches: settings.max_concurrent_fetches.max(1),
        }
    }
}

/// Watch limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub min_period_secs: u64,
    pub min_cooldown_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            min_period_secs: 10,
            min_cooldown_secs: 0,
        }
    }
}

impl From<&LimitSettings> for WatchLimits {
    fn from(settings: &LimitSettings) -> Self {
        WatchLimits {
            min_period: Duration::from_secs(settings.min_period_secs),
            min_cooldown: Duration::from_secs(settings.min_cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single JSON document, rewritten atomically.
    #[default]
    Json,
    Sqlite,
}

/// Registry storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: "watches.json".to_string(),
        }
    }
}

impl StorageSettings {
    /// Connection string for the SQLite backend.
    pub fn sqlite_url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite://{}", self.path)
        }
    }
}
