//! Wheel and sensor configuration - the physical setup being observed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Wheel geometry and session detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    /// Wheel circumference in centimetres (d * pi).
    /// Default: 88.0 (28cm diameter)
    pub circumference_cm: f64,

    /// Minimum time between two revolutions, in milliseconds.
    /// Edges closer together than this are contact bounce.
    /// Default: 250
    pub debounce_ms: u64,

    /// Silence after which a session ends, in seconds.
    /// Default: 60
    pub session_timeout_s: u64,

    /// Revolutions needed before a session counts as real activity.
    /// Default: 5
    pub activation_threshold: u32,
}

impl WheelConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_s)
    }
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            circumference_cm: 88.0,
            debounce_ms: 250,
            session_timeout_s: 60,
            activation_threshold: 5,
        }
    }
}

/// GPIO sensor wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// BCM pin number the reed switch is wired to.
    /// Default: 10
    pub gpio_pin: u32,

    /// Root of the sysfs GPIO interface.
    /// Default: /sys/class/gpio
    pub sysfs_root: PathBuf,

    /// Longest single blocking wait, in milliseconds. Shutdown requests are
    /// noticed between slices.
    /// Default: 500
    pub poll_slice_ms: u64,
}

impl SensorConfig {
    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 10,
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            poll_slice_ms: 500,
        }
    }
}
