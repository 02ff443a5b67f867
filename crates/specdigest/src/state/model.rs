//! Job lifecycle record and its parts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::summary::SummaryDocument;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Started,
    Progress,
    Success,
    Failure,
    Retry,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
        }
    }

    /// SUCCESS and FAILURE end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing stage a progress entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parsing,
    Analysis,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::Analysis => "analysis",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress report within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub stage: Stage,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The single lifecycle record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub progress: Vec<ProgressEntry>,
    #[serde(default)]
    pub result: Option<SummaryDocument>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retries: u32,
    /// Queue task id of the most recent stage execution.
    #[serde(default)]
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    /// A fresh STARTED record.
    pub fn new(job_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            state: TaskState::Started,
            progress: Vec::new(),
            result: None,
            error: None,
            retries: 0,
            task_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn latest_progress(&self) -> Option<&ProgressEntry> {
        self.progress.last()
    }

    /// Appends a progress entry. The progress value is clamped into
    /// `[0, 100]` and the timestamp never goes backwards.
    pub fn push_progress(
        &mut self,
        stage: Stage,
        progress: f64,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
        let timestamp = match self.progress.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.progress.push(ProgressEntry {
            stage,
            progress,
            message,
            timestamp,
        });
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `result` is present exactly on SUCCESS and `error` exactly on FAILURE.
    pub fn is_consistent(&self) -> bool {
        self.result.is_some() == (self.state == TaskState::Success)
            && self.error.is_some() == (self.state == TaskState::Failure)
    }
}
