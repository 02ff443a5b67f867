//! Parse → Analyze → Export, run as separately retryable queue tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

pub mod context;
pub mod error;
pub mod progress;
pub mod results;
pub mod stages;
pub mod wrapper;

pub use context::{RetryPolicy, StageContext};
pub use error::StageError;
pub use progress::{NoopProgress, ProgressReporter, StoreProgress};
pub use results::{AnalysisResult, ExportResult, ParseRequest, ParseResult, StageMessage};
pub use wrapper::{run_stage, StageOutcome};

use crate::error::WorkerError;
use crate::llm::LlmAnalyzer;
use crate::state::{StateStore, TaskState};
use crate::worker::TaskQueue;

/// Everything a stage needs, shared by all workers.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: StateStore,
    pub storage_root: PathBuf,
    pub analyzer: LlmAnalyzer,
    pub retry: RetryPolicy,
}

impl PipelineDeps {
    /// Runs the stage `message` starts. A completed stage yields the message
    /// for the next one, or `None` once the chain is done.
    pub async fn execute(
        &self,
        ctx: &StageContext,
        message: &StageMessage,
    ) -> StageOutcome<Option<StageMessage>> {
        if let Some(outcome) = self.finished_outcome(ctx, message) {
            return outcome;
        }

        let stage = message.stage();
        let task_id = ctx.task_id.as_str();
        match message {
            StageMessage::Parse(request) => run_stage(
                &self.store,
                &self.storage_root,
                &self.retry,
                ctx,
                stage,
                || stages::parse_stage(self, task_id, request),
            )
            .await
            .map(|result| Some(StageMessage::Analyze(result))),
            StageMessage::Analyze(input) => run_stage(
                &self.store,
                &self.storage_root,
                &self.retry,
                ctx,
                stage,
                || stages::analyze_stage(self, task_id, input),
            )
            .await
            .map(|result| Some(StageMessage::Export(result))),
            StageMessage::Export(input) => run_stage(
                &self.store,
                &self.storage_root,
                &self.retry,
                ctx,
                stage,
                || stages::export_stage(self, task_id, input),
            )
            .await
            .map(|_| None),
        }
    }

    /// A delivery for a job that already reached SUCCESS or FAILURE replays
    /// that result without touching the record.
    fn finished_outcome(
        &self,
        ctx: &StageContext,
        message: &StageMessage,
    ) -> Option<StageOutcome<Option<StageMessage>>> {
        let job = match self.store.get(&ctx.job_id) {
            Ok(job) => job?,
            Err(e) => {
                warn!(job_id = %ctx.job_id, error = %e, "Could not read job state before stage");
                return None;
            }
        };
        let outcome = match job.state {
            TaskState::Success => StageOutcome::Completed(None),
            TaskState::Failure => StageOutcome::Failed {
                error: job.error.unwrap_or_else(|| "job already failed".to_string()),
            },
            _ => return None,
        };
        info!(
            job_id = %ctx.job_id,
            task_id = %ctx.task_id,
            stage = %message.stage(),
            state = %job.state,
            "Skipping stage for finished job"
        );
        Some(outcome)
    }
}

/// Submits jobs to the queue.
#[derive(Clone)]
pub struct Pipeline {
    queue: Arc<dyn TaskQueue>,
}

impl Pipeline {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Enqueues the parse stage. Returns the task id.
    pub fn start(&self, job_id: &str, spec_path: &Path) -> Result<String, WorkerError> {
        self.queue.enqueue(StageMessage::Parse(ParseRequest {
            job_id: job_id.to_string(),
            spec_path: spec_path.to_path_buf(),
        }))
    }
}
