use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use tempfile::TempDir;

use crate::record::{format_start, parse_start};
use crate::{PersistencePort, SessionRecord, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start TEXT NOT NULL UNIQUE,
    circumference REAL NOT NULL,
    duration REAL NOT NULL,
    distance REAL NOT NULL,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start DESC);
"#;

/// A session row as read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: i64,
    pub record: SessionRecord,
    pub recorded_at: String,
}

/// Session database with connection-per-call.
/// Each method opens a fresh connection with WAL mode enabled, so a database
/// that went away between calls is noticed on the next save.
#[derive(Debug, Clone)]
pub struct SessionDb {
    path: PathBuf,
}

impl SessionDb {
    /// Open database at path, creating it and its schema if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self { path };
        db.initialize()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection with WAL mode and busy timeout
    fn conn(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Unavailable {
            path: self.path.clone(),
            source,
        })?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        Ok(conn)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert a finished session. A second session with the same start time
    /// is rejected with [`StoreError::Duplicate`].
    pub fn insert(&self, record: &SessionRecord) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let start = record.start_key();

        let result = conn.execute(
            "INSERT INTO sessions (start, circumference, duration, distance) VALUES (?1, ?2, ?3, ?4)",
            params![start, record.circumference, record.duration, record.distance],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StoreError::Duplicate { start })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a session by its start time
    pub fn get(&self, start: &DateTime<Utc>) -> Result<Option<StoredSession>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, start, circumference, duration, distance, recorded_at
             FROM sessions WHERE start = ?1",
        )?;
        let mut rows = stmt.query(params![format_start(start)])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// List the most recent sessions, newest first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<StoredSession>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, start, circumference, duration, distance, recorded_at
             FROM sessions ORDER BY start DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl PersistencePort for SessionDb {
    fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.insert(record).map(|_| ())
    }
}

/// A throwaway database in its own temporary directory. Dropping it removes
/// the directory, the database and its WAL files.
#[derive(Debug)]
pub struct ScratchDb {
    db: SessionDb,
    dir: TempDir,
}

impl ScratchDb {
    pub fn new() -> Result<Self, StoreError> {
        let dir = tempfile::Builder::new().prefix("hamstore-").tempdir()?;
        let db = SessionDb::open(dir.path().join("sessions.db"))?;
        Ok(Self { db, dir })
    }

    pub fn db(&self) -> &SessionDb {
        &self.db
    }

    /// Directory for other scratch files that should go away with the db.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<StoredSession, StoreError> {
    let start_text: String = row.get(1)?;
    let start = parse_start(&start_text).ok_or_else(|| StoreError::Corrupt {
        reason: format!("unparseable start time {:?}", start_text),
    })?;

    Ok(StoredSession {
        id: row.get(0)?,
        record: SessionRecord {
            start,
            circumference: row.get(2)?,
            duration: row.get(3)?,
            distance: row.get(4)?,
        },
        recorded_at: row.get(5)?,
    })
}
