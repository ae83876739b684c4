//! Infrastructure configuration - storage, notification and telemetry endpoints.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Base directory for hamtrack data files.
/// Default: ~/.local/share/hamtrack
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".local/share/hamtrack"))
        .unwrap_or_else(|| PathBuf::from(".local/share/hamtrack"))
}

/// Session storage and its retry/fallback behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding finished sessions.
    /// Default: ~/.local/share/hamtrack/sessions.db
    pub db_path: PathBuf,

    /// Append-only log written when the database cannot take a session.
    /// Default: ~/.local/share/hamtrack/fallback.log
    pub fallback_path: PathBuf,

    /// Save attempts before giving up and writing the fallback log.
    /// Default: 20
    pub max_attempts: u32,

    /// Fixed wait between save attempts, in seconds.
    /// Default: 30
    pub retry_delay_s: u64,

    /// Finished sessions that may wait for the persistence worker.
    /// Default: 16
    pub queue_depth: usize,
}

impl StorageConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_s)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("sessions.db"),
            fallback_path: data_dir.join("fallback.log"),
            max_attempts: 20,
            retry_delay_s: 30,
            queue_depth: 16,
        }
    }
}

/// Push notification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// HTTP endpoint that fans notifications out to subscribers.
    /// When unset, notifications are only logged.
    pub endpoint: Option<String>,

    /// Topic subscribers listen on.
    /// Default: news
    pub topic: String,

    /// Server key sent as `Authorization: key=...`.
    pub api_key: Option<String>,

    /// Per-request timeout in milliseconds.
    /// Default: 5000
    pub timeout_ms: u64,

    /// Notifications that may wait for delivery before new ones are dropped.
    /// Default: 16
    pub queue_depth: usize,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            topic: "news".to_string(),
            api_key: None,
            timeout_ms: 5000,
            queue_depth: 16,
        }
    }
}

/// Logging and observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an
    /// EnvFilter expression).
    /// Default: info
    pub log_level: String,

    /// OTLP gRPC endpoint. Only used when built with the `otel` feature.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otlp_endpoint: None,
        }
    }
}
