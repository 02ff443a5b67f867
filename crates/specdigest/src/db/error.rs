use std::path::PathBuf;
use thiserror::Error;

/// Failures of the SQLite state database.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("State database query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create state database directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A writer panicked while holding the connection.
    #[error("State database connection poisoned")]
    ConnectionPoisoned,
}
