//! Follow-up questions answered from a job's raw specification.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{IndexCache, LlmAnalyzer, LlmError};
use crate::storage::{JobStorage, StorageError};

pub const MAX_QUERY_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryStatus {
    Pending,
    Success,
    Failure,
}

/// The latest query of a job, stored as `query.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    pub query: String,
    pub status: QueryStatus,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn pending(query: &str) -> Self {
        let now = Utc::now();
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            status: QueryStatus::Pending,
            answer: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn finish(mut self, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(answer) => {
                self.status = QueryStatus::Success;
                self.answer = Some(answer);
            }
            Err(error) => {
                self.status = QueryStatus::Failure;
                self.error = Some(error);
            }
        }
        self.updated_at = Utc::now().max(self.created_at);
        self
    }
}

/// Checks the 1..=1000 character bound on a question.
pub fn validate_query(query: &str) -> Result<(), String> {
    let chars = query.chars().count();
    if chars == 0 {
        Err("Query must not be empty".to_string())
    } else if chars > MAX_QUERY_CHARS {
        Err(format!("Query must be at most {MAX_QUERY_CHARS} characters"))
    } else {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum QueryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("Specification file not found")]
    SpecMissing,
    #[error("Index task failed: {0}")]
    Join(String),
}

#[derive(Clone)]
pub struct QueryService {
    analyzer: LlmAnalyzer,
    indexes: IndexCache,
}

impl QueryService {
    pub fn new(analyzer: LlmAnalyzer, storage_root: &Path) -> Self {
        Self {
            analyzer,
            indexes: IndexCache::new(storage_root),
        }
    }

    /// Saves a pending record and answers it on a background task.
    pub fn submit(&self, storage: JobStorage, query: &str) -> Result<QueryRecord, StorageError> {
        let record = QueryRecord::pending(query);
        storage.save_query(&record)?;

        let service = self.clone();
        let pending = record.clone();
        tokio::spawn(async move {
            service.run(&storage, pending).await;
        });
        Ok(record)
    }

    /// Answers `record` and stores the outcome unless a newer query replaced it.
    pub async fn run(&self, storage: &JobStorage, record: QueryRecord) -> QueryRecord {
        let outcome = self.answer(storage, &record.query).await;
        if let Err(e) = &outcome {
            warn!(job_id = %storage.job_id(), error = %e, "Query failed");
        } else {
            info!(job_id = %storage.job_id(), "Query answered");
        }
        let finished = record.finish(outcome.map_err(|e| e.to_string()));

        let superseded = storage
            .get_query()
            .is_some_and(|current| current.query_id != finished.query_id);
        if superseded {
            info!(job_id = %storage.job_id(), "Discarding answer to a replaced query");
        } else if let Err(e) = storage.save_query(&finished) {
            warn!(job_id = %storage.job_id(), error = %e, "Failed to save query result");
        }
        finished
    }

    async fn answer(&self, storage: &JobStorage, question: &str) -> Result<String, QueryError> {
        let text = storage.read_spec()?.ok_or(QueryError::SpecMissing)?;
        let indexes = self.indexes.clone();
        let index = tokio::task::spawn_blocking(move || indexes.get_or_build(&text))
            .await
            .map_err(|e| QueryError::Join(e.to_string()))??;
        Ok(self.analyzer.answer_query(&index, question).await?)
    }
}
