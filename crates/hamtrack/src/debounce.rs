//! Software debounce for the reed switch.
//!
//! A magnet passing the switch can produce several rising edges within a
//! few milliseconds. Only the first edge of each burst counts as a
//! revolution; anything closer than the debounce interval to the last
//! accepted edge is dropped.

use std::time::Duration;

use crate::time::Timestamp;

/// A rising edge that survived debouncing - one wheel revolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevolutionEvent {
    pub timestamp: Timestamp,
    /// Seconds since the previous accepted edge, if there was one.
    pub since_previous: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: f64,
    last_accepted: Option<Timestamp>,
    last_seen: Option<Timestamp>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.as_secs_f64(),
            last_accepted: None,
            last_seen: None,
        }
    }

    /// Filter one raw edge.
    ///
    /// # Panics
    ///
    /// If `raw` is earlier than a previously seen edge. Edge timestamps must
    /// come from a monotonic clock.
    pub fn accept(&mut self, raw: Timestamp) -> Option<RevolutionEvent> {
        if let Some(previous) = self.last_seen {
            assert!(
                raw >= previous,
                "edge timestamps went backwards: {} after {}",
                raw.as_secs(),
                previous.as_secs()
            );
        }
        self.last_seen = Some(raw);

        let since_previous = self.last_accepted.map(|last| raw.seconds_since(last));
        if matches!(since_previous, Some(gap) if gap < self.interval) {
            return None;
        }

        self.last_accepted = Some(raw);
        Some(RevolutionEvent {
            timestamp: raw,
            since_previous,
        })
    }

    pub fn last_accepted(&self) -> Option<Timestamp> {
        self.last_accepted
    }
}
