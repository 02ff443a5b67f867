use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;

use super::queue::{Delivery, QueueHealth, TaskQueue};
use crate::error::WorkerError;
use crate::pipeline::{PipelineDeps, StageOutcome};
use crate::state::StateStore;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const SHUTDOWN_ERROR: &str = "Worker pool shut down before the job finished";

#[derive(Default)]
struct PoolState {
    shutdown: AtomicBool,
    active_workers: AtomicUsize,
    active_tasks: AtomicUsize,
}

/// In-process task queue. Worker threads pull deliveries off a shared
/// channel and drive each stage on the tokio runtime behind `runtime`.
pub struct WorkerPool {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
    store: StateStore,
    state: Arc<PoolState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        deps: PipelineDeps,
        worker_count: usize,
        runtime: Handle,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let store = deps.store.clone();
        let (sender, receiver) = unbounded::<Delivery>();
        let state = Arc::new(PoolState::default());
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                receiver: receiver.clone(),
                sender: sender.clone(),
                state: Arc::clone(&state),
                deps: deps.clone(),
                runtime: runtime.clone(),
            };

            state.active_workers.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("specdigest-worker-{worker_id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    state.active_workers.fetch_sub(1, Ordering::SeqCst);
                    state.shutdown.store(true, Ordering::SeqCst);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            sender,
            receiver,
            store,
            state,
            workers: Mutex::new(workers),
        })
    }

    /// Stops accepting tasks. Workers exit after their current task. Jobs
    /// whose next delivery is still queued or waiting out a retry delay are
    /// marked FAILURE so they do not sit in a running state until expiry.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.drain();
    }

    fn drain(&self) {
        for delivery in self.receiver.try_iter() {
            abandon(&self.store, &delivery);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    /// Blocks until every worker thread has exited.
    pub fn wait(&self) {
        let workers = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        // Stages that finished during shutdown may have chained a delivery.
        self.drain();
        info!("All workers have stopped");
    }
}

/// Fails the job a delivery belongs to, unless it already finished.
fn abandon(store: &StateStore, delivery: &Delivery) {
    let job_id = delivery.message.job_id();
    match store.get(job_id) {
        Ok(Some(job)) if job.is_terminal() => return,
        Ok(_) => {}
        Err(e) => warn!("Job {}: could not read state while abandoning: {}", job_id, e),
    }
    warn!(
        "Abandoning task {} ({}) for job {}",
        delivery.task_id,
        delivery.message.stage(),
        job_id
    );
    if let Err(e) = store.set_failure(job_id, SHUTDOWN_ERROR) {
        error!("Job {}: failed to record shutdown: {}", job_id, e);
    }
}

impl TaskQueue for WorkerPool {
    fn enqueue(&self, message: crate::pipeline::StageMessage) -> Result<String, WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }

        let delivery = Delivery::new(message);
        let task_id = delivery.task_id.clone();
        self.sender
            .send(delivery)
            .map_err(|_| WorkerError::ChannelClosed)?;
        Ok(task_id)
    }

    fn health(&self) -> QueueHealth {
        QueueHealth {
            accepting: !self.is_shutdown(),
            active_workers: self.state.active_workers.load(Ordering::SeqCst),
            active_tasks: self.state.active_tasks.load(Ordering::SeqCst),
            queued: self.sender.len(),
        }
    }
}

struct Worker {
    id: usize,
    receiver: Receiver<Delivery>,
    sender: Sender<Delivery>,
    state: Arc<PoolState>,
    deps: PipelineDeps,
    runtime: Handle,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.state.shutdown.load(Ordering::SeqCst) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(delivery) => {
                    self.state.active_tasks.fetch_add(1, Ordering::SeqCst);
                    self.process(delivery);
                    self.state.active_tasks.fetch_sub(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} channel disconnected", self.id);
                    break;
                }
            }
        }

        self.state.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("Worker {} stopped", self.id);
    }

    fn process(&self, delivery: Delivery) {
        let ctx = delivery.context();
        debug!(
            "Worker {} running {} for job {} (task {}, attempt {})",
            self.id,
            delivery.message.stage(),
            ctx.job_id,
            ctx.task_id,
            ctx.attempt
        );

        let outcome = self
            .runtime
            .block_on(self.deps.execute(&ctx, &delivery.message));

        match outcome {
            StageOutcome::Completed(Some(next)) => {
                let next = Delivery::new(next);
                debug!(
                    "Job {} continues with {} (task {})",
                    ctx.job_id,
                    next.message.stage(),
                    next.task_id
                );
                if self.sender.send(next).is_err() {
                    error!("Job {}: failed to enqueue next stage", ctx.job_id);
                }
            }
            StageOutcome::Completed(None) => {
                info!("Job {} finished", ctx.job_id);
            }
            StageOutcome::Retry { delay, error } => {
                debug!(
                    "Job {}: redelivering task {} in {:?} after: {}",
                    ctx.job_id, ctx.task_id, delay, error
                );
                let redelivery = delivery.redelivery();
                let sender = self.sender.clone();
                let state = Arc::clone(&self.state);
                let store = self.deps.store.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if state.shutdown.load(Ordering::SeqCst) {
                        abandon(&store, &redelivery);
                        return;
                    }
                    if sender.send(redelivery).is_err() {
                        error!("Failed to redeliver task");
                    }
                });
            }
            StageOutcome::Failed { error } => {
                error!(
                    "Dead-lettered task {} for job {} after attempt {}: {}",
                    ctx.task_id, ctx.job_id, ctx.attempt, error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::db::Database;
    use crate::llm::{CompletionProvider, LlmAnalyzer, LlmConfig, LlmError};
    use crate::pipeline::{Pipeline, RetryPolicy};
    use crate::state::{JobState, StateStore, TaskState};
    use crate::storage::{JobStorage, SpecFormat};

    const SPEC: &str = "openapi: 3.0.0\ninfo: {title: Pets, version: '1.0'}\npaths:\n  /pets:\n    get:\n      responses:\n        '200': {description: ok}\n";

    /// Fails the first `failures` calls with a transport error.
    struct FlakyProvider {
        failures: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for FlakyProvider {
        async fn complete(&self, _: &str, _: &str, _: &LlmConfig) -> Result<String, LlmError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(LlmError::Transport("connection reset".to_string()));
            }
            Ok("analysis".to_string())
        }
    }

    fn deps(root: &TempDir, failures: usize, retry: RetryPolicy) -> PipelineDeps {
        let provider = Arc::new(FlakyProvider {
            failures: AtomicUsize::new(failures),
        });
        PipelineDeps {
            store: StateStore::new(Database::open_in_memory().unwrap()),
            storage_root: root.path().to_path_buf(),
            analyzer: LlmAnalyzer::new(provider, LlmConfig::default()),
            retry,
        }
    }

    fn create_job(root: &TempDir, store: &StateStore, job_id: &str) -> PathBuf {
        let storage = JobStorage::create(root.path(), job_id).unwrap();
        let path = storage.save_spec(SPEC, SpecFormat::Yaml).unwrap();
        store.set_started(job_id).unwrap();
        path
    }

    async fn wait_for_terminal(store: &StateStore, job_id: &str) -> JobState {
        for _ in 0..200 {
            if let Some(state) = store.get(job_id).unwrap() {
                if state.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_runs_chain_to_success() {
        let root = TempDir::new().unwrap();
        let deps = deps(&root, 0, RetryPolicy::default());
        let store = deps.store.clone();
        let pool = Arc::new(WorkerPool::new(deps, 2, Handle::current()).unwrap());
        let pipeline = Pipeline::new(pool.clone());

        let spec_path = create_job(&root, &store, "job-1");
        pipeline.start("job-1", &spec_path).unwrap();

        let state = wait_for_terminal(&store, "job-1").await;
        assert_eq!(state.state, TaskState::Success);
        assert_eq!(state.result.unwrap().endpoints[0].method, "GET");
        assert!(state.task_id.is_some());

        pool.shutdown();
        pool.wait();
        assert_eq!(pool.health().active_workers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_failure_is_redelivered() {
        let root = TempDir::new().unwrap();
        let deps = deps(&root, 1, RetryPolicy::new(2, Duration::from_millis(20)));
        let store = deps.store.clone();
        let pool = Arc::new(WorkerPool::new(deps, 1, Handle::current()).unwrap());

        let spec_path = create_job(&root, &store, "job-1");
        Pipeline::new(pool.clone()).start("job-1", &spec_path).unwrap();

        let state = wait_for_terminal(&store, "job-1").await;
        assert_eq!(state.state, TaskState::Success);
        assert_eq!(state.retries, 1);

        pool.shutdown();
        pool.wait();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dev_policy_fails_fast() {
        let root = TempDir::new().unwrap();
        let deps = deps(&root, 1, RetryPolicy::disabled());
        let store = deps.store.clone();
        let pool = Arc::new(WorkerPool::new(deps, 1, Handle::current()).unwrap());

        let spec_path = create_job(&root, &store, "job-1");
        Pipeline::new(pool.clone()).start("job-1", &spec_path).unwrap();

        let state = wait_for_terminal(&store, "job-1").await;
        assert_eq!(state.state, TaskState::Failure);
        assert!(state.error.unwrap().contains("connection reset"));
        assert_eq!(state.retries, 0);

        pool.shutdown();
        pool.wait();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_rejects_new_tasks() {
        let root = TempDir::new().unwrap();
        let pool = WorkerPool::new(deps(&root, 0, RetryPolicy::default()), 1, Handle::current())
            .unwrap();
        assert!(pool.health().is_healthy());

        pool.shutdown();
        let err = Pipeline::new(Arc::new(pool))
            .start("job-1", std::path::Path::new("spec.yaml"))
            .unwrap_err();
        assert!(matches!(err, WorkerError::ChannelClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_fails_jobs_left_in_queue() {
        let root = TempDir::new().unwrap();
        let deps = deps(&root, 0, RetryPolicy::default());
        let store = deps.store.clone();
        let pool = WorkerPool::new(deps, 1, Handle::current()).unwrap();
        pool.shutdown();
        pool.wait();

        let spec_path = create_job(&root, &store, "job-1");
        pool.sender
            .send(Delivery::new(crate::pipeline::StageMessage::Parse(
                crate::pipeline::ParseRequest {
                    job_id: "job-1".to_string(),
                    spec_path,
                },
            )))
            .unwrap();
        pool.drain();

        let state = store.get("job-1").unwrap().unwrap();
        assert_eq!(state.state, TaskState::Failure);
        assert_eq!(state.error.as_deref(), Some(SHUTDOWN_ERROR));
        assert_eq!(pool.health().queued, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_fails_job_waiting_to_retry() {
        let root = TempDir::new().unwrap();
        let deps = deps(&root, 1, RetryPolicy::new(2, Duration::from_millis(300)));
        let store = deps.store.clone();
        let pool = Arc::new(WorkerPool::new(deps, 1, Handle::current()).unwrap());

        let spec_path = create_job(&root, &store, "job-1");
        Pipeline::new(pool.clone()).start("job-1", &spec_path).unwrap();

        let mut waited = 0;
        while store.get("job-1").unwrap().unwrap().state != TaskState::Retry {
            assert!(waited < 200, "job never entered RETRY");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        pool.shutdown();

        let state = wait_for_terminal(&store, "job-1").await;
        assert_eq!(state.state, TaskState::Failure);
        assert_eq!(state.error.as_deref(), Some(SHUTDOWN_ERROR));
        pool.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let root = TempDir::new().unwrap();
        let result = WorkerPool::new(
            deps(&root, 0, RetryPolicy::default()),
            0,
            runtime.handle().clone(),
        );
        assert!(matches!(result, Err(WorkerError::SpawnFailed(_))));
    }
}
