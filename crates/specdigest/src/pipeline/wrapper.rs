use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use super::context::{RetryPolicy, StageContext};
use super::error::StageError;
use crate::state::{Stage, StateStore};
use crate::storage::JobStorage;

/// What the queue should do after a stage ran.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Completed(T),
    /// Redeliver the same task after `delay`.
    Retry { delay: Duration, error: String },
    /// Terminal; the job is marked FAILURE.
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            StageOutcome::Completed(value) => StageOutcome::Completed(f(value)),
            StageOutcome::Retry { delay, error } => StageOutcome::Retry { delay, error },
            StageOutcome::Failed { error } => StageOutcome::Failed { error },
        }
    }
}

fn log_execution(storage_root: &Path, job_id: &str, line: &str) {
    let appended = JobStorage::open(storage_root, job_id).and_then(|s| {
        if s.dir().is_dir() {
            s.append_log(line)
        } else {
            Ok(())
        }
    });
    if let Err(e) = appended {
        warn!(job_id, error = %e, "Failed to append to execution log");
    }
}

/// Runs one stage body inside its span, stamping the task id first and
/// turning an error into a RETRY or FAILURE record.
pub async fn run_stage<T, F, Fut>(
    store: &StateStore,
    storage_root: &Path,
    retry: &RetryPolicy,
    ctx: &StageContext,
    stage: Stage,
    body: F,
) -> StageOutcome<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let span = info_span!(
        "stage",
        job_id = %ctx.job_id,
        task_id = %ctx.task_id,
        stage = %stage,
        attempt = ctx.attempt,
    );

    async move {
        info!("Stage started");
        log_execution(
            storage_root,
            &ctx.job_id,
            &format!("{stage} started (task {}, attempt {})", ctx.task_id, ctx.attempt),
        );

        let result = match store.set_task_id(&ctx.job_id, &ctx.task_id) {
            Ok(_) => body().await,
            Err(e) => Err(StageError::from(e)),
        };

        match result {
            Ok(value) => {
                info!("Stage finished");
                log_execution(storage_root, &ctx.job_id, &format!("{stage} finished"));
                StageOutcome::Completed(value)
            }
            Err(e) => {
                let message = e.to_string();
                if e.is_retryable() && retry.should_retry(ctx.attempt) {
                    warn!(error = %message, delay_ms = retry.delay.as_millis() as u64, "Stage failed, will retry");
                    if let Err(store_err) = store.set_retry(&ctx.job_id, &message) {
                        warn!(error = %store_err, "Failed to record retry");
                    }
                    log_execution(
                        storage_root,
                        &ctx.job_id,
                        &format!("{stage} failed, retrying: {message}"),
                    );
                    StageOutcome::Retry {
                        delay: retry.delay,
                        error: message,
                    }
                } else {
                    error!(error = %message, "Stage failed");
                    if let Err(store_err) = store.set_failure(&ctx.job_id, &message) {
                        error!(error = %store_err, "Failed to record failure");
                    }
                    log_execution(
                        storage_root,
                        &ctx.job_id,
                        &format!("{stage} failed: {message}"),
                    );
                    StageOutcome::Failed { error: message }
                }
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::db::Database;
    use crate::llm::LlmError;
    use crate::parser::SpecValidationError;
    use crate::state::TaskState;

    fn ctx(attempt: u32) -> StageContext {
        StageContext {
            job_id: "job-1".to_string(),
            task_id: "task-1".to_string(),
            attempt,
        }
    }

    fn setup() -> (TempDir, StateStore) {
        let root = TempDir::new().unwrap();
        JobStorage::create(root.path(), "job-1").unwrap();
        (root, StateStore::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_success_stamps_task_id_and_logs() {
        let (root, store) = setup();
        let outcome = run_stage(
            &store,
            root.path(),
            &RetryPolicy::default(),
            &ctx(1),
            Stage::Parsing,
            || async { Ok::<_, StageError>(7) },
        )
        .await;

        assert_eq!(outcome, StageOutcome::Completed(7));
        let state = store.get("job-1").unwrap().unwrap();
        assert_eq!(state.task_id.as_deref(), Some("task-1"));

        let log = std::fs::read_to_string(root.path().join("job-1/execution.log")).unwrap();
        assert!(log.contains("parsing started (task task-1, attempt 1)"));
        assert!(log.contains("parsing finished"));
    }

    #[tokio::test]
    async fn test_transient_error_schedules_retry() {
        let (root, store) = setup();
        let outcome: StageOutcome<()> = run_stage(
            &store,
            root.path(),
            &RetryPolicy::new(2, Duration::from_millis(5)),
            &ctx(1),
            Stage::Analysis,
            || async { Err(StageError::Llm(LlmError::Transport("reset".into()))) },
        )
        .await;

        assert!(matches!(outcome, StageOutcome::Retry { .. }));
        let state = store.get("job-1").unwrap().unwrap();
        assert_eq!(state.state, TaskState::Retry);
        assert_eq!(state.retries, 1);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_job() {
        let (root, store) = setup();
        let outcome: StageOutcome<()> = run_stage(
            &store,
            root.path(),
            &RetryPolicy::new(2, Duration::from_millis(5)),
            &ctx(3),
            Stage::Analysis,
            || async { Err(StageError::Llm(LlmError::Transport("reset".into()))) },
        )
        .await;

        assert!(matches!(outcome, StageOutcome::Failed { .. }));
        let state = store.get("job-1").unwrap().unwrap();
        assert_eq!(state.state, TaskState::Failure);
        assert!(state.error.unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn test_terminal_error_fails_immediately() {
        let (root, store) = setup();
        let outcome: StageOutcome<()> = run_stage(
            &store,
            root.path(),
            &RetryPolicy::default(),
            &ctx(1),
            Stage::Parsing,
            || async { Err(StageError::Spec(SpecValidationError::MissingInfo)) },
        )
        .await;

        assert!(matches!(outcome, StageOutcome::Failed { .. }));
        assert_eq!(
            store.get("job-1").unwrap().unwrap().state,
            TaskState::Failure
        );
    }

    #[tokio::test]
    async fn test_disabled_policy_never_retries() {
        let (root, store) = setup();
        let outcome: StageOutcome<()> = run_stage(
            &store,
            root.path(),
            &RetryPolicy::disabled(),
            &ctx(1),
            Stage::Analysis,
            || async { Err(StageError::Llm(LlmError::Transport("reset".into()))) },
        )
        .await;

        assert!(matches!(outcome, StageOutcome::Failed { .. }));
    }
}
