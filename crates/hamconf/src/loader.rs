//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HamConfig};
use std::env;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG: &str = "/etc/hamtrack/config.toml";
const LOCAL_CONFIG: &str = "hamtrack.toml";

/// Where the effective configuration came from, for `hamtrack config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files merged, lowest precedence first.
    pub files: Vec<PathBuf>,
    /// Environment variables that replaced a file or default value.
    pub env_overrides: Vec<String>,
}

/// Existing config files in load order: system, user, local.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], with an existing `cli_path` taking the
/// place of `./hamtrack.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|d| d.config_dir().join("hamtrack/config.toml"));
    let local = match cli_path {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => PathBuf::from(LOCAL_CONFIG),
    };

    [Some(PathBuf::from(SYSTEM_CONFIG)), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

/// Read a config file into a raw TOML table.
///
/// The table is also checked against the config schema so type errors are
/// reported against the file that contains them.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    table_to_config(table.clone()).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(table)
}

/// Deserialize a (possibly merged) table, filling gaps with defaults.
pub fn table_to_config(table: toml::Table) -> Result<HamConfig, toml::de::Error> {
    let mut config = toml::Value::Table(table).try_into::<HamConfig>()?;
    config.storage.db_path = expand_path(&config.storage.db_path.to_string_lossy());
    config.storage.fallback_path = expand_path(&config.storage.fallback_path.to_string_lossy());
    config.sensor.sysfs_root = expand_path(&config.sensor.sysfs_root.to_string_lossy());
    Ok(config)
}

/// Merge two tables, with `overlay` taking precedence.
///
/// Nested tables merge key by key; any other value in `overlay` replaces
/// the one in `base`.
pub fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(toml::Value::Table(base_section)), toml::Value::Table(overlay_section)) => {
                base.insert(key, toml::Value::Table(merge_tables(base_section, overlay_section)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Apply `HAMTRACK_*` environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut HamConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_env_overrides_with(config, sources, |name| env::var(name).ok())
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_env_overrides_with<F>(
    config: &mut HamConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut record = |name: &str| sources.env_overrides.push(name.to_string());

    if let Some(v) = lookup("HAMTRACK_CIRCUMFERENCE_CM") {
        config.wheel.circumference_cm = parse_env("HAMTRACK_CIRCUMFERENCE_CM", &v)?;
        record("HAMTRACK_CIRCUMFERENCE_CM");
    }
    if let Some(v) = lookup("HAMTRACK_DEBOUNCE_MS") {
        config.wheel.debounce_ms = parse_env("HAMTRACK_DEBOUNCE_MS", &v)?;
        record("HAMTRACK_DEBOUNCE_MS");
    }
    if let Some(v) = lookup("HAMTRACK_SESSION_TIMEOUT_S") {
        config.wheel.session_timeout_s = parse_env("HAMTRACK_SESSION_TIMEOUT_S", &v)?;
        record("HAMTRACK_SESSION_TIMEOUT_S");
    }
    if let Some(v) = lookup("HAMTRACK_ACTIVATION_THRESHOLD") {
        config.wheel.activation_threshold = parse_env("HAMTRACK_ACTIVATION_THRESHOLD", &v)?;
        record("HAMTRACK_ACTIVATION_THRESHOLD");
    }

    if let Some(v) = lookup("HAMTRACK_GPIO_PIN") {
        config.sensor.gpio_pin = parse_env("HAMTRACK_GPIO_PIN", &v)?;
        record("HAMTRACK_GPIO_PIN");
    }

    if let Some(v) = lookup("HAMTRACK_DB_PATH") {
        config.storage.db_path = expand_path(&v);
        record("HAMTRACK_DB_PATH");
    }
    if let Some(v) = lookup("HAMTRACK_FALLBACK_PATH") {
        config.storage.fallback_path = expand_path(&v);
        record("HAMTRACK_FALLBACK_PATH");
    }

    if let Some(v) = lookup("HAMTRACK_NOTIFY_ENDPOINT") {
        config.notify.endpoint = Some(v);
        record("HAMTRACK_NOTIFY_ENDPOINT");
    }
    if let Some(v) = lookup("HAMTRACK_NOTIFY_API_KEY") {
        config.notify.api_key = Some(v);
        record("HAMTRACK_NOTIFY_API_KEY");
    }

    if let Some(v) = lookup("HAMTRACK_LOG_LEVEL") {
        config.telemetry.log_level = v;
        record("HAMTRACK_LOG_LEVEL");
    }
    // RUST_LOG wins over HAMTRACK_LOG_LEVEL
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        record("RUST_LOG");
    }
    if let Some(v) = lookup("HAMTRACK_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("HAMTRACK_OTLP_ENDPOINT");
    }
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("OTEL_EXPORTER_OTLP_ENDPOINT");
    }

    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Expand a leading `~/` or `$VAR`. Unset variables are left as written.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(path),
        };
    }

    if let Some(var_and_rest) = path.strip_prefix('$') {
        let (var, rest) = var_and_rest.split_once('/').unwrap_or((var_and_rest, ""));
        if let Ok(value) = env::var(var) {
            let base = PathBuf::from(value);
            return if rest.is_empty() { base } else { base.join(rest) };
        }
    }

    PathBuf::from(path)
}
