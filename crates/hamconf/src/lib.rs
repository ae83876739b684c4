//! Configuration loading for hamtrack.
//!
//! All values are fixed at process start; nothing here is reconfigured
//! at runtime.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/hamtrack/config.toml` (system)
//! 2. `~/.config/hamtrack/config.toml` (user)
//! 3. `./hamtrack.toml` (local override, or the `--config` path)
//! 4. Environment variables (`HAMTRACK_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [wheel]
//! circumference_cm = 88.0
//! debounce_ms = 250
//! session_timeout_s = 60
//! activation_threshold = 5
//!
//! [sensor]
//! gpio_pin = 10
//!
//! [storage]
//! db_path = "~/.local/share/hamtrack/sessions.db"
//! fallback_path = "~/.local/share/hamtrack/fallback.log"
//! max_attempts = 20
//! retry_delay_s = 30
//!
//! [notify]
//! endpoint = "https://fcm.googleapis.com/fcm/send"
//! topic = "news"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod infra;
pub mod loader;
pub mod wheel;

pub use infra::{NotifyConfig, StorageConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use wheel::{SensorConfig, WheelConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Environment variable {var} has unusable value {value:?}")]
    Env { var: String, value: String },

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete hamtrack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HamConfig {
    pub wheel: WheelConfig,
    pub sensor: SensorConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
    pub telemetry: TelemetryConfig,
}

impl HamConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local
    /// `./hamtrack.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table_from_file(&path)?;
            merged = loader::merge_tables(merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged).map_err(|e| ConfigError::Parse {
            path: sources.files.last().cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let circumference = self.wheel.circumference_cm;
        if !circumference.is_finite() || circumference <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "wheel.circumference_cm",
                reason: format!("must be a positive number, got {}", circumference),
            });
        }
        if self.wheel.session_timeout_s == 0 {
            return Err(ConfigError::Invalid {
                field: "wheel.session_timeout_s",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.wheel.activation_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "wheel.activation_threshold",
                reason: "must be at least 1 revolution".to_string(),
            });
        }
        if self.sensor.poll_slice_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sensor.poll_slice_ms",
                reason: "must be at least 1 millisecond".to_string(),
            });
        }
        if self.storage.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.max_attempts",
                reason: "must allow at least one attempt".to_string(),
            });
        }
        if self.storage.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.queue_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.notify.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "notify.queue_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    ///
    /// The API key is masked.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# hamtrack configuration\n\n");

        output.push_str("[wheel]\n");
        output.push_str(&format!(
            "circumference_cm = {:?}\n",
            self.wheel.circumference_cm
        ));
        output.push_str(&format!("debounce_ms = {}\n", self.wheel.debounce_ms));
        output.push_str(&format!(
            "session_timeout_s = {}\n",
            self.wheel.session_timeout_s
        ));
        output.push_str(&format!(
            "activation_threshold = {}\n",
            self.wheel.activation_threshold
        ));

        output.push_str("\n[sensor]\n");
        output.push_str(&format!("gpio_pin = {}\n", self.sensor.gpio_pin));
        output.push_str(&format!(
            "sysfs_root = \"{}\"\n",
            self.sensor.sysfs_root.display()
        ));
        output.push_str(&format!("poll_slice_ms = {}\n", self.sensor.poll_slice_ms));

        output.push_str("\n[storage]\n");
        output.push_str(&format!(
            "db_path = \"{}\"\n",
            self.storage.db_path.display()
        ));
        output.push_str(&format!(
            "fallback_path = \"{}\"\n",
            self.storage.fallback_path.display()
        ));
        output.push_str(&format!("max_attempts = {}\n", self.storage.max_attempts));
        output.push_str(&format!("retry_delay_s = {}\n", self.storage.retry_delay_s));
        output.push_str(&format!("queue_depth = {}\n", self.storage.queue_depth));

        output.push_str("\n[notify]\n");
        if let Some(endpoint) = &self.notify.endpoint {
            output.push_str(&format!("endpoint = \"{}\"\n", endpoint));
        }
        output.push_str(&format!("topic = \"{}\"\n", self.notify.topic));
        if self.notify.api_key.is_some() {
            output.push_str("api_key = \"********\"\n");
        }
        output.push_str(&format!("timeout_ms = {}\n", self.notify.timeout_ms));
        output.push_str(&format!("queue_depth = {}\n", self.notify.queue_depth));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.telemetry.log_level
        ));
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HamConfig::default();
        assert_eq!(config.wheel.circumference_cm, 88.0);
        assert_eq!(config.wheel.debounce_ms, 250);
        assert_eq!(config.wheel.session_timeout_s, 60);
        assert_eq!(config.wheel.activation_threshold, 5);
        assert_eq!(config.storage.max_attempts, 20);
        assert_eq!(config.storage.retry_delay_s, 30);
        assert!(config.notify.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_roundtrips_through_loader() {
        let mut config = HamConfig::default();
        config.wheel.circumference_cm = 91.25;
        config.notify.endpoint = Some("http://push.local/send".to_string());

        let rendered = config.to_toml();
        assert!(rendered.contains("[wheel]"));
        assert!(rendered.contains("[storage]"));
        assert!(rendered.contains("circumference_cm = 91.25"));

        let table: toml::Table = rendered.parse().unwrap();
        let reparsed = loader::table_to_config(table).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_to_toml_masks_api_key() {
        let mut config = HamConfig::default();
        config.notify.api_key = Some("AAAA-secret".to_string());
        let rendered = config.to_toml();
        assert!(!rendered.contains("AAAA-secret"));
        assert!(rendered.contains("api_key = \"********\""));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = HamConfig::default();
        config.wheel.activation_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "wheel.activation_threshold", .. }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_circumference() {
        for bad in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let mut config = HamConfig::default();
            config.wheel.circumference_cm = bad;
            assert!(config.validate().is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wheel.toml");
        std::fs::write(
            &path,
            "[wheel]\ncircumference_cm = 70.0\nactivation_threshold = 3\n",
        )
        .unwrap();

        let (config, sources) = HamConfig::load_with_sources_from(Some(&path)).unwrap();
        assert!(sources.files.contains(&path));
        assert_eq!(config.wheel.activation_threshold, 3);
    }
}
