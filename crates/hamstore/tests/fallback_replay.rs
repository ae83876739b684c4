//! Fallback log replay into the session database.

use chrono::{TimeZone, Utc};
use hamstore::{FallbackLog, PersistencePort, SessionDb, SessionRecord};
use tempfile::TempDir;

fn record(millis: i64, revolutions: u32) -> SessionRecord {
    SessionRecord {
        start: Utc.timestamp_millis_opt(millis).unwrap(),
        circumference: 88.0,
        duration: 45.0,
        distance: revolutions as f64 * 88.0,
    }
}

fn setup() -> (SessionDb, FallbackLog, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = SessionDb::open(temp.path().join("sessions.db")).unwrap();
    let log = FallbackLog::new(temp.path().join("fallback.log"));
    (db, log, temp)
}

#[test]
fn test_replay_imports_and_counts_duplicates() {
    let (db, log, _temp) = setup();

    let already_stored = record(1_700_000_000_000, 20);
    db.save(&already_stored).unwrap();

    log.append(&already_stored).unwrap();
    log.append(&record(1_700_000_600_000, 31)).unwrap();
    log.append(&record(1_700_001_200_000, 7)).unwrap();

    let report = log.replay_into(&db).unwrap();

    assert_eq!(report.imported, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(db.count().unwrap(), 3);
}

#[test]
fn test_replay_twice_is_idempotent() {
    let (db, log, _temp) = setup();
    log.append(&record(10_000, 9)).unwrap();

    let first = log.replay_into(&db).unwrap();
    let second = log.replay_into(&db).unwrap();

    assert_eq!(first.imported, 1);
    assert_eq!(second.imported, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(db.count().unwrap(), 1);
}

#[test]
fn test_archive_moves_log_aside() {
    let (_db, log, _temp) = setup();
    log.append(&record(10_000, 9)).unwrap();

    let archived = log.archive("imported").unwrap().expect("log existed");

    assert!(!log.path().exists());
    assert!(archived.to_string_lossy().ends_with("fallback.log.imported"));
    let reopened = FallbackLog::new(&archived);
    assert_eq!(reopened.read_all().unwrap().len(), 1);
}

#[test]
fn test_stored_values_are_not_rounded() {
    let (db, _log, _temp) = setup();
    let precise = SessionRecord {
        start: Utc.timestamp_millis_opt(123_456_789).unwrap(),
        circumference: 87.96459430051421,
        duration: 45.123456789,
        distance: 17.0 * 87.96459430051421,
    };

    db.save(&precise).unwrap();
    let stored = db.get(&precise.start).unwrap().unwrap();

    assert_eq!(stored.record, precise);
}
