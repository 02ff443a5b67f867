use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State store unavailable: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to serialize state for job '{job_id}': {source}")]
    Serialize {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}
