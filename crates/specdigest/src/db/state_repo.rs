//! Row-level access to the `job_states` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw row from the `job_states` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRow {
    pub job_id: String,
    pub state: String,
    /// JSON-serialized job state record.
    pub payload: String,
    pub updated_at: String,
    /// Expiry as unix milliseconds.
    pub expires_at: i64,
}

impl StateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get("job_id")?,
            state: row.get("state")?,
            payload: row.get("payload")?,
            updated_at: row.get("updated_at")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

/// Inserts or overwrites the row for `row.job_id`.
pub fn upsert(db: &Database, row: &StateRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_states (job_id, state, payload, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id) DO UPDATE SET
                state = excluded.state,
                payload = excluded.payload,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            params![
                row.job_id,
                row.state,
                row.payload,
                row.updated_at,
                row.expires_at
            ],
        )?;
        Ok(())
    })
}

/// Finds a row by job id, regardless of expiry.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<StateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT job_id, state, payload, updated_at, expires_at
                 FROM job_states WHERE job_id = ?1",
                params![job_id],
                StateRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Deletes a row. Returns whether a row was removed.
pub fn delete(db: &Database, job_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM job_states WHERE job_id = ?1", params![job_id])?;
        Ok(affected > 0)
    })
}

/// Deletes a single row only if it is expired at `now_ms`.
pub fn delete_if_expired(db: &Database, job_id: &str, now_ms: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM job_states WHERE job_id = ?1 AND expires_at <= ?2",
            params![job_id, now_ms],
        )?;
        Ok(affected > 0)
    })
}

/// Deletes every row expired at `now_ms`. Returns the number removed.
pub fn delete_expired(db: &Database, now_ms: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "DELETE FROM job_states WHERE expires_at <= ?1",
            params![now_ms],
        )?;
        Ok(affected)
    })
}

/// Counts rows that have not expired at `now_ms`.
pub fn count_live(db: &Database, now_ms: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM job_states WHERE expires_at > ?1",
            params![now_ms],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Returns the linked SQLite library version.
pub fn sqlite_version(db: &Database) -> Result<String, DatabaseError> {
    db.with_conn(|conn| {
        let version: String = conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
        Ok(version)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_row(id: &str, expires_at: i64) -> StateRow {
        StateRow {
            job_id: id.to_string(),
            state: "STARTED".to_string(),
            payload: "{}".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = test_db();
        upsert(&db, &sample_row("job-1", 100)).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.state, "STARTED");
        assert_eq!(found.expires_at, 100);
    }

    #[test]
    fn test_upsert_overwrites() {
        let db = test_db();
        upsert(&db, &sample_row("job-2", 100)).unwrap();

        let mut row = sample_row("job-2", 500);
        row.state = "SUCCESS".to_string();
        upsert(&db, &row).unwrap();

        let found = find_by_id(&db, "job-2").unwrap().unwrap();
        assert_eq!(found.state, "SUCCESS");
        assert_eq!(found.expires_at, 500);
        assert_eq!(count_live(&db, 0).unwrap(), 1);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_if_expired_keeps_live_rows() {
        let db = test_db();
        upsert(&db, &sample_row("live", 1_000)).unwrap();

        assert!(!delete_if_expired(&db, "live", 999).unwrap());
        assert!(delete_if_expired(&db, "live", 1_000).unwrap());
        assert!(find_by_id(&db, "live").unwrap().is_none());
    }

    #[test]
    fn test_delete_expired_and_count() {
        let db = test_db();
        upsert(&db, &sample_row("old", 10)).unwrap();
        upsert(&db, &sample_row("new", 1_000)).unwrap();

        assert_eq!(count_live(&db, 50).unwrap(), 1);
        assert_eq!(delete_expired(&db, 50).unwrap(), 1);
        assert!(find_by_id(&db, "new").unwrap().is_some());
        assert!(delete(&db, "new").unwrap());
        assert!(!delete(&db, "new").unwrap());
    }

    #[test]
    fn test_sqlite_version() {
        let db = test_db();
        let version = sqlite_version(&db).unwrap();
        assert!(version.starts_with('3'));
    }
}
