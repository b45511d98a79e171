//! SQLite usage sink (feature `database`).

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::error;

use crate::relay::error::{ErrorKind, Result, ResultWrappedExt};
use super::{UsageRecord, UsageSink};

/// Bumped whenever the `transit` table's shape changes. A relay started
/// against an older database rebuilds the table rather than trying to
/// migrate it in place: usage rows are an accounting aid, not a ledger
/// worth preserving across incompatible schema changes.
const SCHEMA_VERSION: i64 = 3;

pub struct DatabaseUsageSink {
    conn: Connection,
}

impl DatabaseUsageSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).wrapped(ErrorKind::Database)?;
        Self::migrate(&conn)?;
        Ok(DatabaseUsageSink { conn })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT);",
        )
        .wrapped(ErrorKind::Database)?;
        let version: Option<i64> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok());

        if version != Some(SCHEMA_VERSION) {
            conn.execute_batch("DROP TABLE IF EXISTS transit;")
                .wrapped(ErrorKind::Database)?;
            conn.execute_batch(
                "CREATE TABLE transit (
                    started INTEGER,
                    total_time INTEGER,
                    waiting_time INTEGER,
                    total_bytes INTEGER,
                    mood TEXT
                );",
            )
            .wrapped(ErrorKind::Database)?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION.to_string()],
            )
            .wrapped(ErrorKind::Database)?;
        }
        Ok(())
    }
}

impl UsageSink for DatabaseUsageSink {
    fn record(&mut self, record: &UsageRecord) {
        let result = self.conn.execute(
            "INSERT INTO transit (started, total_time, waiting_time, total_bytes, mood)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.started as i64,
                record.total_time as i64,
                record.waiting_time.map(|w| w as i64),
                record.total_bytes as i64,
                record.mood.as_str(),
            ],
        );
        if let Err(err) = result {
            error!(error = %err, "failed to insert usage record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_records_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.sqlite");
        let mut sink = DatabaseUsageSink::open(&path).unwrap();
        sink.record(&UsageRecord {
            kind: "transit",
            started: 1,
            total_time: 2,
            waiting_time: Some(0),
            total_bytes: 3,
            mood: crate::relay::mood::Mood::Happy,
        });
        let count: i64 = sink
            .conn
            .query_row("SELECT COUNT(*) FROM transit", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn reopening_with_same_version_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.sqlite");
        {
            let mut sink = DatabaseUsageSink::open(&path).unwrap();
            sink.record(&UsageRecord {
                kind: "transit",
                started: 1,
                total_time: 2,
                waiting_time: Some(0),
                total_bytes: 3,
                mood: crate::relay::mood::Mood::Happy,
            });
        }
        let sink = DatabaseUsageSink::open(&path).unwrap();
        let count: i64 = sink
            .conn
            .query_row("SELECT COUNT(*) FROM transit", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
