use tracing::warn;

use crate::state::{Stage, StateStore};

pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: Stage, progress: f64, message: &str);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _stage: Stage, _progress: f64, _message: &str) {}
}

/// Appends progress entries to the job's state record.
///
/// Progress is best effort: a failed write is logged and the stage goes on.
pub struct StoreProgress {
    store: StateStore,
    job_id: String,
}

impl StoreProgress {
    pub fn new(store: StateStore, job_id: &str) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
        }
    }
}

impl ProgressReporter for StoreProgress {
    fn report(&self, stage: Stage, progress: f64, message: &str) {
        if let Err(e) = self
            .store
            .update_progress(&self.job_id, stage, progress, Some(message))
        {
            warn!(job_id = %self.job_id, %stage, error = %e, "Failed to record progress");
        }
    }
}
