//! Durable storage for finished wheel sessions.
//!
//! - [`SessionDb`]: SQLite table with one row per session, unique on start time
//! - [`FallbackLog`]: append-only text log used when the database keeps failing
//! - [`RetryPolicy`]: how often and how patiently a save is retried
//!
//! The retry loop itself lives with the caller.

pub mod db;
pub mod fallback;
pub mod record;
pub mod retry;

pub use db::{ScratchDb, SessionDb, StoredSession};
pub use fallback::{FallbackError, FallbackLog, ReplayReport};
pub use record::SessionRecord;
pub use retry::RetryPolicy;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A session with this start time is already stored.
    #[error("session starting at {start} is already stored")]
    Duplicate { start: String },

    #[error("cannot open session database {path}: {source}")]
    Unavailable {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("stored session is unreadable: {reason}")]
    Corrupt { reason: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether trying the same save again may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Duplicate { .. } | StoreError::Corrupt { .. })
    }
}

/// Where finished sessions go.
///
/// Implementations block; callers run them off latency-sensitive threads.
pub trait PersistencePort: Send + Sync {
    fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_duplicates_and_corruption_are_permanent() {
        assert!(!StoreError::Duplicate { start: "x".into() }.is_transient());
        assert!(!StoreError::Corrupt { reason: "x".into() }.is_transient());
        assert!(StoreError::Io(std::io::Error::other("disk gone")).is_transient());
        assert!(StoreError::Sqlite(rusqlite::Error::InvalidQuery).is_transient());
    }
}
