use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{JobState, ProgressEntry, TaskState};
use crate::summary::SummaryDocument;

pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "application/json",
    "text/yaml",
    "application/x-yaml",
    "text/plain",
    "text/x-yaml",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryReady {
    pub status: TaskState,
    pub result: SummaryDocument,
}

/// Returned with 202 while a job (or query) is still running.
#[derive(Debug, Serialize, Deserialize)]
pub struct Pending {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Pending {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            progress: None,
            detail: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub job_id: String,
    pub status: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retries: u32,
    pub task_id: Option<String>,
    /// Latest progress entry.
    pub progress: Option<ProgressEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SummaryDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobState> for StateResponse {
    fn from(state: JobState) -> Self {
        Self {
            progress: state.latest_progress().cloned(),
            job_id: state.job_id,
            status: state.state,
            created_at: state.created_at,
            updated_at: state.updated_at,
            retries: state.retries,
            task_id: state.task_id,
            result: state.result,
            error: state.error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub file_format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryAccepted {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query: String,
    pub answer: String,
}
