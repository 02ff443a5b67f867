//! SQLite file behind the state store. One `job_states` table, WAL mode,
//! and a busy timeout so the API process and worker processes can open the
//! same file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod migrations;
pub mod state_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared connection to the state database. Clones share the connection;
/// statements from one process run one at a time.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Creates the file and its directory when missing, then brings the
    /// schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::run_all(&conn)?;

        log::info!("State database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database with the current schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::ConnectionPoisoned)?;
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.specdigest/data/state.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".specdigest").join("data").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        first
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO job_states (job_id, state, payload, updated_at, expires_at) VALUES ('a', 'STARTED', '{}', '2026-01-01', 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let count = second
            .with_conn(|conn| {
                let count: u32 =
                    conn.query_row("SELECT COUNT(*) FROM job_states", [], |r| r.get(0))?;
                Ok(count)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_under_a_file_reports_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = Database::open(&blocker.join("state.db")).err().unwrap();

        assert!(matches!(err, DatabaseError::CreateDirectory { ref path, .. } if path == &blocker));
        assert!(err.to_string().contains("state database directory"));
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("state.db"));
        assert!(path.to_string_lossy().contains(".specdigest"));
    }
}
