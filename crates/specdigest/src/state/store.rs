use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::state_repo::{self, StateRow};
use crate::db::Database;
use crate::summary::SummaryDocument;

use super::clock::{Clock, SystemClock};
use super::error::StateError;
use super::model::{JobState, Stage, TaskState};

/// Records live for seven days after their last write.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Liveness information about the backing store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub sqlite_version: String,
    pub records: u64,
}

/// Durable, TTL-bounded record of each job's lifecycle.
///
/// Every write replaces the whole record and pushes its expiry out by the
/// TTL. Convenience transitions are read-modify-write without a lock, so
/// two writers racing on one job id can lose an update (last write wins).
#[derive(Clone)]
pub struct StateStore {
    db: Database,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl StateStore {
    pub fn new(db: Database) -> Self {
        Self::with_ttl(db, DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Reads a job's record.
    ///
    /// Missing, expired and unreadable records are all reported as `None`.
    pub fn get(&self, job_id: &str) -> Result<Option<JobState>, StateError> {
        let Some(row) = state_repo::find_by_id(&self.db, job_id)? else {
            return Ok(None);
        };

        let now_ms = self.clock.now().timestamp_millis();
        if row.expires_at <= now_ms {
            debug!(job_id, "State record expired");
            state_repo::delete_if_expired(&self.db, job_id, now_ms)?;
            return Ok(None);
        }

        match serde_json::from_str::<JobState>(&row.payload) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(job_id, error = %e, "Ignoring unreadable state record");
                Ok(None)
            }
        }
    }

    /// Overwrites a job's record, stamping `updated_at` and resetting the
    /// expiry. Returns the record as written.
    ///
    /// `updated_at` never moves behind the stored record's, even when the
    /// writer's clock lags another process's.
    pub fn set(&self, mut state: JobState) -> Result<JobState, StateError> {
        let now = self.clock.now();
        state.updated_at = now.max(state.created_at);
        if let Some(previous) = self.get(&state.job_id)? {
            state.updated_at = state.updated_at.max(previous.updated_at);
        }

        if !state.is_consistent() {
            warn!(
                job_id = %state.job_id,
                state = %state.state,
                "Writing state record with result/error not matching its state"
            );
        }

        let payload = serde_json::to_string(&state).map_err(|source| StateError::Serialize {
            job_id: state.job_id.clone(),
            source,
        })?;

        let row = StateRow {
            job_id: state.job_id.clone(),
            state: state.state.as_str().to_string(),
            payload,
            updated_at: state.updated_at.to_rfc3339(),
            expires_at: now.timestamp_millis().saturating_add(self.ttl_millis()),
        };
        state_repo::upsert(&self.db, &row)?;

        debug!(job_id = %state.job_id, state = %state.state, "State record written");
        Ok(state)
    }

    fn modify<F>(&self, job_id: &str, f: F) -> Result<JobState, StateError>
    where
        F: FnOnce(&mut JobState, DateTime<Utc>),
    {
        let now = self.clock.now();
        let mut state = self
            .get(job_id)?
            .unwrap_or_else(|| JobState::new(job_id, now));
        f(&mut state, now);
        self.set(state)
    }

    pub fn set_started(&self, job_id: &str) -> Result<JobState, StateError> {
        self.modify(job_id, |state, _| {
            state.state = TaskState::Started;
            state.result = None;
            state.error = None;
        })
    }

    pub fn update_progress(
        &self,
        job_id: &str,
        stage: Stage,
        progress: f64,
        message: Option<&str>,
    ) -> Result<JobState, StateError> {
        self.modify(job_id, |state, now| {
            state.state = TaskState::Progress;
            state.result = None;
            state.error = None;
            state.push_progress(stage, progress, message.map(str::to_string), now);
        })
    }

    pub fn set_success(
        &self,
        job_id: &str,
        result: SummaryDocument,
    ) -> Result<JobState, StateError> {
        self.modify(job_id, |state, _| {
            state.state = TaskState::Success;
            state.result = Some(result);
            state.error = None;
        })
    }

    pub fn set_failure(&self, job_id: &str, error: &str) -> Result<JobState, StateError> {
        self.modify(job_id, |state, _| {
            state.state = TaskState::Failure;
            state.result = None;
            state.error = Some(error.to_string());
        })
    }

    /// Marks the job as waiting for another attempt and bumps `retries`.
    /// A job with no record starts at one retry.
    pub fn set_retry(&self, job_id: &str, error: &str) -> Result<JobState, StateError> {
        self.modify(job_id, |state, now| {
            state.state = TaskState::Retry;
            state.result = None;
            state.error = None;
            state.retries = state.retries.saturating_add(1);
            if let Some(last) = state.latest_progress().cloned() {
                state.push_progress(
                    last.stage,
                    last.progress,
                    Some(format!("Retrying after error: {error}")),
                    now,
                );
            }
        })
    }

    /// Records which queue task is currently working on the job.
    pub fn set_task_id(&self, job_id: &str, task_id: &str) -> Result<JobState, StateError> {
        self.modify(job_id, |state, _| {
            state.task_id = Some(task_id.to_string());
        })
    }

    pub fn delete(&self, job_id: &str) -> Result<bool, StateError> {
        Ok(state_repo::delete(&self.db, job_id)?)
    }

    /// Removes all expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StateError> {
        let removed = state_repo::delete_expired(&self.db, self.clock.now().timestamp_millis())?;
        if removed > 0 {
            debug!(removed, "Purged expired state records");
        }
        Ok(removed)
    }

    pub fn ping(&self) -> Result<StoreHealth, StateError> {
        Ok(StoreHealth {
            sqlite_version: state_repo::sqlite_version(&self.db)?,
            records: state_repo::count_live(&self.db, self.clock.now().timestamp_millis())?,
        })
    }
}
