//! Wall-clock timestamps that never run backwards.
//!
//! Session starts are reported as wall-clock time, but the debouncer needs
//! timestamps that never decrease. [`Clock`] anchors a monotonic
//! `Instant` to the wall clock once, at construction, and derives every
//! later reading from the monotonic side.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Whole milliseconds since the epoch, truncated.
    pub fn as_millis(self) -> i64 {
        (self.0 * 1000.0) as i64
    }

    /// Seconds elapsed since `earlier` (negative if `earlier` is later).
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }

    /// Millisecond-precision UTC datetime.
    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.as_millis())
            .single()
            .unwrap_or_default()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_secs_f64())
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 - rhs.as_secs_f64())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Monotonic clock reporting wall-clock timestamps.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: Timestamp,
    anchor: Instant,
}

impl Clock {
    /// Anchor to the current system time.
    pub fn new() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self::starting_at(Timestamp(wall))
    }

    /// Anchor to an arbitrary timestamp; `now()` advances from there.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            anchor_wall: start,
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.anchor_wall + self.anchor.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_truncate() {
        assert_eq!(Timestamp(1.2349).as_millis(), 1234);
        assert_eq!(Timestamp(1000.0).as_millis(), 1_000_000);
    }

    #[test]
    fn duration_arithmetic() {
        let t = Timestamp(100.0);
        assert_eq!(t - Duration::from_secs(60), Timestamp(40.0));
        assert_eq!(t + Duration::from_millis(250), Timestamp(100.25));
        assert_eq!(Timestamp(1045.0).seconds_since(Timestamp(1000.0)), 45.0);
    }

    #[test]
    fn clock_never_goes_backwards() {
        let clock = Clock::starting_at(Timestamp(5_000.0));
        let mut previous = clock.now();
        assert!(previous >= Timestamp(5_000.0));
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= previous);
            previous = now;
        }
    }

    #[test]
    fn datetime_has_millisecond_precision() {
        let dt = Timestamp(1_700_000_000.1239).to_datetime();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
    }
}
