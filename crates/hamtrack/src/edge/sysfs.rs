//! Rising edges from the Linux sysfs GPIO interface.
//!
//! The pin is exported and set to interrupt on rising edges; `poll(2)` on
//! the value file then wakes with `POLLPRI` once per edge.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{EdgeResult, EdgeSource, SensorError};
use crate::time::Clock;

/// udev may need a moment to fix permissions on a freshly exported pin.
const CONFIGURE_ATTEMPTS: u32 = 10;
const CONFIGURE_BACKOFF: Duration = Duration::from_millis(50);

pub struct SysfsEdgeSource {
    pin: u32,
    root: PathBuf,
    /// Whether we exported the pin and so must unexport it.
    exported: bool,
    value: Option<File>,
    clock: Clock,
}

impl SysfsEdgeSource {
    pub fn open(root: impl Into<PathBuf>, pin: u32, clock: Clock) -> Result<Self, SensorError> {
        let mut source = Self {
            pin,
            root: root.into(),
            exported: false,
            value: None,
            clock,
        };

        if !source.pin_dir().exists() {
            fs::write(source.root.join("export"), pin.to_string())
                .map_err(|e| SensorError::Export { pin, source: e })?;
            source.exported = true;
            debug!(pin, "exported GPIO pin");
        }

        // On failure `source` drops here and unexports the pin.
        source.configure("direction", "in")?;
        source.configure("edge", "rising")?;

        let value_path = source.pin_dir().join("value");
        let mut value = File::open(&value_path).map_err(|e| SensorError::Configure {
            path: value_path,
            source: e,
        })?;
        // A pending interrupt from before we started would otherwise fire at once.
        drain(&mut value).map_err(SensorError::Wait)?;
        source.value = Some(value);

        info!(pin, root = %source.root.display(), "GPIO sensor ready");
        Ok(source)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn configure(&self, attribute: &str, setting: &str) -> Result<(), SensorError> {
        let path = self.pin_dir().join(attribute);
        let mut attempt = 1;
        loop {
            match write_attribute(&path, setting) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < CONFIGURE_ATTEMPTS && is_settling(&e) => {
                    attempt += 1;
                    std::thread::sleep(CONFIGURE_BACKOFF);
                }
                Err(e) => return Err(SensorError::Configure { path, source: e }),
            }
        }
    }
}

impl EdgeSource for SysfsEdgeSource {
    fn wait_for_rising_edge(&mut self, timeout: Duration) -> Result<EdgeResult, SensorError> {
        let value = self.value.as_mut().ok_or(SensorError::Disconnected)?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut fds = libc::pollfd {
                fd: value.as_raw_fd(),
                events: libc::POLLPRI | libc::POLLERR,
                revents: 0,
            };
            // SAFETY: `fds` is a single valid pollfd that outlives the call.
            let ready = unsafe { libc::poll(&mut fds, 1, poll_timeout_ms(remaining)) };

            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(SensorError::Wait(err));
            }
            if ready == 0 {
                return Ok(EdgeResult::TimedOut);
            }

            let at = self.clock.now();
            drain(value).map_err(SensorError::Wait)?;
            return Ok(EdgeResult::Edge(at));
        }
    }
}

impl Drop for SysfsEdgeSource {
    fn drop(&mut self) {
        self.value.take();
        if self.exported {
            match fs::write(self.root.join("unexport"), self.pin.to_string()) {
                Ok(()) => debug!(pin = self.pin, "unexported GPIO pin"),
                Err(e) => warn!(pin = self.pin, error = %e, "failed to unexport GPIO pin"),
            }
        }
    }
}

fn write_attribute(path: &Path, setting: &str) -> io::Result<()> {
    fs::write(path, setting)
}

fn is_settling(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

fn drain(value: &mut File) -> io::Result<()> {
    let mut buf = [0u8; 8];
    value.seek(SeekFrom::Start(0))?;
    while value.read(&mut buf)? > 0 {}
    Ok(())
}

/// Rounds up so a sub-millisecond remainder does not become a busy poll.
fn poll_timeout_ms(remaining: Duration) -> libc::c_int {
    let ms = remaining.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
