//! Append-only fallback log for sessions the database could not take.
//!
//! Blocks are human-readable and YAML-compatible:
//!
//! ```text
//! ---
//! start: 2024-05-01T20:15:03.120Z
//! circumference: 88
//! duration: 45
//! distance: 1760
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::record::format_start;
use crate::{PersistencePort, SessionRecord, StoreError};

const DELIMITER: &str = "---";

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("fallback log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// `line` is 0 when the parser could not tell where the problem is.
    #[error("fallback log line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("store rejected fallback record: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of replaying the fallback log into a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub imported: usize,
    /// Records whose start time was already stored.
    pub duplicates: usize,
}

#[derive(Debug, Clone)]
pub struct FallbackLog {
    path: PathBuf,
}

impl FallbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a block. Creates the file and its directory on
    /// first use.
    pub fn append(&self, record: &SessionRecord) -> Result<(), FallbackError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let block = format!(
            "{DELIMITER}\nstart: {}\ncircumference: {}\nduration: {}\ndistance: {}\n",
            format_start(&record.start),
            record.circumference,
            record.duration,
            record.distance,
        );

        // Single write so concurrent appenders never interleave inside a block.
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(block.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Parse every block in the log. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<SessionRecord>, FallbackError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        parse_blocks(&contents)
    }

    /// Save every logged record into `store`. Duplicates count as already
    /// imported; any other store error stops the replay.
    pub fn replay_into(&self, store: &dyn PersistencePort) -> Result<ReplayReport, FallbackError> {
        let mut report = ReplayReport::default();
        for record in self.read_all()? {
            match store.save(&record) {
                Ok(()) => report.imported += 1,
                Err(StoreError::Duplicate { .. }) => report.duplicates += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    /// Move the log aside once its contents are safely stored.
    /// Returns the new path, or `None` if there was no log.
    pub fn archive(&self, suffix: &str) -> Result<Option<PathBuf>, FallbackError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut archived = self.path.clone().into_os_string();
        archived.push(format!(".{suffix}"));
        let archived = PathBuf::from(archived);
        fs::rename(&self.path, &archived)?;
        Ok(Some(archived))
    }
}

fn parse_blocks(contents: &str) -> Result<Vec<SessionRecord>, FallbackError> {
    let mut records = Vec::new();
    for document in serde_yaml::Deserializer::from_str(contents) {
        // An empty document (a bare delimiter) carries nothing.
        let record = Option::<SessionRecord>::deserialize(document).map_err(|e| {
            FallbackError::Malformed {
                line: e.location().map_or(0, |l| l.line()),
                reason: e.to_string(),
            }
        })?;
        records.extend(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(millis: i64, duration: f64, distance: f64) -> SessionRecord {
        SessionRecord {
            start: Utc.timestamp_millis_opt(millis).unwrap(),
            circumference: 88.0,
            duration,
            distance,
        }
    }

    #[test]
    fn append_writes_key_value_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let log = FallbackLog::new(dir.path().join("fallback.log"));

        log.append(&record(1_700_000_000_000, 45.5, 1760.0)).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            text,
            "---\nstart: 2023-11-14T22:13:20.000Z\ncircumference: 88\nduration: 45.5\ndistance: 1760\n"
        );
    }

    #[test]
    fn appended_blocks_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = FallbackLog::new(dir.path().join("sub/fallback.log"));
        let first = record(1_000, 61.25, 880.0);
        let second = record(500_000, 12.0, 440.0);

        log.append(&first).unwrap();
        log.append(&second).unwrap();

        assert_eq!(log.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FallbackLog::new(dir.path().join("absent.log"));
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.archive("done").unwrap(), None);
    }

    #[test]
    fn incomplete_block_is_reported() {
        let text = "---\nstart: 2023-11-14T22:13:20.000Z\ncircumference: 88\n---\nstart: x\n";
        let err = parse_blocks(text).unwrap_err();
        match err {
            FallbackError::Malformed { reason, .. } => {
                assert!(reason.contains("missing field `duration`"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_numeric_value_points_at_its_line() {
        let text = "---\nstart: 2023-11-14T22:13:20.000Z\ncircumference: 88\nduration: 10\ndistance: 176\n---\nstart: 2023-11-14T22:20:00.000Z\ncircumference: 88\nduration: soon\ndistance: 176\n";
        match parse_blocks(text).unwrap_err() {
            FallbackError::Malformed { line, reason } => {
                // Somewhere in the second block.
                assert!(line > 5, "line {line}");
                assert!(reason.contains("duration"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unparseable_start_is_rejected() {
        let text = "---\nstart: yesterday\ncircumference: 88\nduration: 10\ndistance: 176\n";
        assert!(matches!(
            parse_blocks(text).unwrap_err(),
            FallbackError::Malformed { .. }
        ));
    }

    #[test]
    fn unknown_keys_and_blank_lines_are_tolerated() {
        let text = "\n---\nstart: 2023-11-14T22:13:20.000Z\nnote: bedding change\ncircumference: 88\n\nduration: 10\ndistance: 176\n";
        let records = parse_blocks(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].distance, 176.0);
    }

    #[test]
    fn bare_delimiters_and_missing_leading_delimiter_are_accepted() {
        let text = "start: 2023-11-14T22:13:20.000Z\ncircumference: 88\nduration: 10\ndistance: 176\n---\n---\nstart: 2023-11-14T22:20:00.000Z\ncircumference: 88\nduration: 20\ndistance: 352\n";
        let records = parse_blocks(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].duration, 20.0);
    }
}
