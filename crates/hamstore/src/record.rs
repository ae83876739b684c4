use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

/// A finished session as it is stored.
///
/// `duration` is in seconds and `distance` in centimetres, both unrounded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionRecord {
    /// When the first revolution of the session was seen. Unique per session.
    pub start: DateTime<Utc>,
    /// Wheel circumference the distance was computed with, in cm.
    pub circumference: f64,
    pub duration: f64,
    pub distance: f64,
}

impl SessionRecord {
    /// Storage key: RFC 3339 with millisecond precision, always UTC.
    pub fn start_key(&self) -> String {
        format_start(&self.start)
    }
}

pub(crate) fn format_start(start: &DateTime<Utc>) -> String {
    start.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_start(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
