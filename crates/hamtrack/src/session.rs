//! Session lifecycle state machine.
//!
//! ```text
//!            revolution                 count reaches threshold
//!   Idle ───────────────▶ Accumulating ─────────────────────────▶ Active
//!    ▲                         │                                     │
//!    │       timeout: Aborted  │                timeout: Finished    │
//!    └─────────────────────────┴─────────────────────────────────────┘
//! ```
//!
//! Only Active sessions are real. The activation threshold keeps a few
//! stray nudges of the wheel from being announced or stored.

use std::fmt;
use std::time::Duration;

use crate::debounce::RevolutionEvent;
use crate::metrics::SessionMetrics;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Revolutions needed before a session is announced.
    pub activation_threshold: u32,
    pub session_timeout: Duration,
    pub circumference_cm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProgress {
    pub session_start: Timestamp,
    pub revolution_count: u32,
    pub last_revolution: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Accumulating(SessionProgress),
    Active(SessionProgress),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Accumulating(_) => "accumulating",
            SessionState::Active(_) => "active",
        }
    }

    pub fn revolution_count(&self) -> u32 {
        match self {
            SessionState::Idle => 0,
            SessionState::Accumulating(p) | SessionState::Active(p) => p.revolution_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The timeout elapsed before the activation threshold was reached.
    BelowThreshold { threshold: u32 },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::BelowThreshold { threshold } => {
                write!(f, "fewer than {threshold} revolutions before timeout")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinishedSession {
    pub start: Timestamp,
    /// Timeout fire time minus the session timeout: roughly the last
    /// moment the wheel was turning.
    pub end: Timestamp,
    pub revolutions: u32,
    pub circumference_cm: f64,
}

impl FinishedSession {
    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics::compute(self.start, self.end, self.revolutions, self.circumference_cm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionOutcome {
    Started {
        start: Timestamp,
    },
    Finished(FinishedSession),
    Aborted {
        start: Timestamp,
        revolutions: u32,
        reason: AbortReason,
    },
}

#[derive(Debug, Clone)]
pub struct SessionTracker {
    config: TrackerConfig,
    state: SessionState,
}

impl SessionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn on_revolution(&mut self, event: &RevolutionEvent) -> Option<SessionOutcome> {
        let at = event.timestamp;
        let threshold = self.config.activation_threshold.max(1);

        let progress = match self.state {
            SessionState::Idle => SessionProgress {
                session_start: at,
                revolution_count: 1,
                last_revolution: at,
            },
            SessionState::Accumulating(p) => SessionProgress {
                revolution_count: p.revolution_count + 1,
                last_revolution: at,
                ..p
            },
            SessionState::Active(p) => {
                self.state = SessionState::Active(SessionProgress {
                    revolution_count: p.revolution_count.saturating_add(1),
                    last_revolution: at,
                    ..p
                });
                return None;
            }
        };

        if progress.revolution_count >= threshold {
            self.state = SessionState::Active(progress);
            Some(SessionOutcome::Started {
                start: progress.session_start,
            })
        } else {
            self.state = SessionState::Accumulating(progress);
            None
        }
    }

    /// No revolution arrived for a full session timeout; `now` is when the
    /// wait gave up.
    pub fn on_timeout(&mut self, now: Timestamp) -> Option<SessionOutcome> {
        let outcome = match self.state {
            SessionState::Idle => return None,
            SessionState::Accumulating(p) => SessionOutcome::Aborted {
                start: p.session_start,
                revolutions: p.revolution_count,
                reason: AbortReason::BelowThreshold {
                    threshold: self.config.activation_threshold,
                },
            },
            SessionState::Active(p) => SessionOutcome::Finished(FinishedSession {
                start: p.session_start,
                end: now - self.config.session_timeout,
                revolutions: p.revolution_count,
                circumference_cm: self.config.circumference_cm,
            }),
        };
        self.state = SessionState::Idle;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(threshold: u32) -> SessionTracker {
        SessionTracker::new(TrackerConfig {
            activation_threshold: threshold,
            session_timeout: Duration::from_secs(60),
            circumference_cm: 88.0,
        })
    }

    fn rev(t: f64) -> RevolutionEvent {
        RevolutionEvent {
            timestamp: Timestamp(t),
            since_previous: None,
        }
    }

    #[test]
    fn started_fires_on_the_threshold_revolution_only() {
        let mut t = tracker(5);
        for i in 0..4 {
            assert_eq!(t.on_revolution(&rev(i as f64)), None);
            assert!(matches!(t.state(), SessionState::Accumulating(_)));
        }
        assert_eq!(
            t.on_revolution(&rev(4.0)),
            Some(SessionOutcome::Started { start: Timestamp(0.0) })
        );
        for i in 5..20 {
            assert_eq!(t.on_revolution(&rev(i as f64)), None);
        }
        assert_eq!(t.state().revolution_count(), 20);
    }

    #[test]
    fn threshold_of_one_starts_immediately() {
        let mut t = tracker(1);
        assert_eq!(
            t.on_revolution(&rev(7.0)),
            Some(SessionOutcome::Started { start: Timestamp(7.0) })
        );
        assert_eq!(t.state().name(), "active");
    }

    #[test]
    fn timeout_while_accumulating_aborts() {
        let mut t = tracker(5);
        t.on_revolution(&rev(0.0));
        t.on_revolution(&rev(1.0));

        let outcome = t.on_timeout(Timestamp(61.0));
        assert_eq!(
            outcome,
            Some(SessionOutcome::Aborted {
                start: Timestamp(0.0),
                revolutions: 2,
                reason: AbortReason::BelowThreshold { threshold: 5 },
            })
        );
        assert_eq!(*t.state(), SessionState::Idle);
    }

    #[test]
    fn finished_end_is_biased_back_by_the_timeout() {
        let mut t = tracker(2);
        t.on_revolution(&rev(100.0));
        t.on_revolution(&rev(101.0));
        t.on_revolution(&rev(130.0));

        match t.on_timeout(Timestamp(190.0)) {
            Some(SessionOutcome::Finished(done)) => {
                assert_eq!(done.start, Timestamp(100.0));
                assert_eq!(done.end, Timestamp(130.0));
                assert_eq!(done.revolutions, 3);
                assert_eq!(done.metrics().distance_cm, 3.0 * 88.0);
            }
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    fn idle_timeout_is_silent() {
        let mut t = tracker(5);
        assert_eq!(t.on_timeout(Timestamp(1.0)), None);
        assert_eq!(*t.state(), SessionState::Idle);
    }

    #[test]
    fn next_session_starts_fresh() {
        let mut t = tracker(2);
        t.on_revolution(&rev(0.0));
        t.on_revolution(&rev(1.0));
        t.on_timeout(Timestamp(61.0));
        assert_eq!(t.state().revolution_count(), 0);

        assert_eq!(t.on_revolution(&rev(500.0)), None);
        match t.state() {
            SessionState::Accumulating(p) => {
                assert_eq!(p.session_start, Timestamp(500.0));
                assert_eq!(p.revolution_count, 1);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
