use crate::time::Timestamp;

/// Derived figures for a finished session. Values are unrounded; only
/// presentation rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionMetrics {
    pub duration_s: f64,
    pub distance_cm: f64,
}

impl SessionMetrics {
    pub fn compute(
        start: Timestamp,
        end: Timestamp,
        revolutions: u32,
        circumference_cm: f64,
    ) -> Self {
        Self {
            duration_s: end.seconds_since(start),
            distance_cm: revolutions as f64 * circumference_cm,
        }
    }

    pub fn duration_min(&self) -> f64 {
        self.duration_s / 60.0
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_cm / 100.0
    }
}
