//! Sources of rising edges from the wheel sensor.

mod channel;
mod sysfs;

pub use channel::ChannelEdgeSource;
pub use sysfs::SysfsEdgeSource;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeResult {
    Edge(Timestamp),
    TimedOut,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("cannot export GPIO pin {pin}: {source}")]
    Export { pin: u32, source: io::Error },

    #[error("cannot configure {path}: {source}")]
    Configure { path: PathBuf, source: io::Error },

    #[error("waiting for edge failed: {0}")]
    Wait(#[source] io::Error),

    #[error("edge source disconnected")]
    Disconnected,
}

/// Blocking wait for the next rising edge.
///
/// Implementations release whatever they hold when dropped.
pub trait EdgeSource: Send {
    /// Block until a rising edge or until `timeout` passes, whichever is first.
    fn wait_for_rising_edge(&mut self, timeout: Duration) -> Result<EdgeResult, SensorError>;
}

impl<E: EdgeSource + ?Sized> EdgeSource for Box<E> {
    fn wait_for_rising_edge(&mut self, timeout: Duration) -> Result<EdgeResult, SensorError> {
        (**self).wait_for_rising_edge(timeout)
    }
}
