//! In-process environment for driving the HTTP API: a temp storage root,
//! a file-backed state store, a scripted completion provider and either a
//! real worker pool or a queue that only records what it was given.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tower::ServiceExt;

use specdigest::db::Database;
use specdigest::llm::LlmError;
use specdigest::pipeline::StageMessage;
use specdigest::worker::QueueHealth;
use specdigest::{
    build_router, AppState, CompletionProvider, JobState, LlmAnalyzer, LlmConfig, Pipeline,
    PipelineDeps, QueryService, RetryPolicy, StateStore, TaskQueue, WorkerError, WorkerPool,
};

pub const PETSTORE_YAML: &str = r#"openapi: 3.0.0
info:
  title: Pet Store
  version: "1.0"
  description: Sells pets.
paths:
  /pets:
    get:
      summary: List pets
      responses:
        "200":
          description: A list of pets
"#;

const BOUNDARY: &str = "specdigest-test-boundary";

/// Answers every prompt with a fixed text, or fails while `failing` is set.
#[derive(Default)]
pub struct ScriptedProvider {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, _system: &str, user: &str, _: &LlmConfig) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::Auth("invalid api key".to_string()));
        }
        Ok(format!("Scripted answer ({} prompt chars)", user.len()))
    }
}

/// Accepts tasks without running them.
#[derive(Default)]
pub struct RecordingQueue {
    pub messages: Mutex<Vec<StageMessage>>,
    pub reject: AtomicBool,
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, message: StageMessage) -> Result<String, WorkerError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(WorkerError::ChannelClosed);
        }
        self.messages.lock().unwrap().push(message);
        Ok(uuid::Uuid::new_v4().to_string())
    }

    fn health(&self) -> QueueHealth {
        QueueHealth {
            accepting: !self.reject.load(Ordering::SeqCst),
            active_workers: 1,
            active_tasks: 0,
            queued: self.messages.lock().unwrap().len(),
        }
    }
}

pub struct Response {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub storage_root: PathBuf,
    pub store: StateStore,
    pub provider: Arc<ScriptedProvider>,
    pub recorder: Option<Arc<RecordingQueue>>,
    pool: Option<Arc<WorkerPool>>,
    router: Router,
}

impl TestHarness {
    /// Harness with two workers processing jobs. Needs a multi-thread runtime.
    pub fn with_workers() -> Self {
        Self::build(true)
    }

    /// Harness whose queue never runs anything.
    pub fn with_recording_queue() -> Self {
        Self::build(false)
    }

    fn build(run_workers: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_root = temp_dir.path().join("jobs");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage root");

        let db = Database::open(&temp_dir.path().join("state.db")).expect("Failed to open database");
        let store = StateStore::new(db);
        let provider = Arc::new(ScriptedProvider::default());
        let analyzer = LlmAnalyzer::new(provider.clone(), LlmConfig::default());

        let (queue, recorder, pool): (Arc<dyn TaskQueue>, _, _) = if run_workers {
            let deps = PipelineDeps {
                store: store.clone(),
                storage_root: storage_root.clone(),
                analyzer: analyzer.clone(),
                retry: RetryPolicy::new(1, Duration::from_millis(10)),
            };
            let pool = Arc::new(
                WorkerPool::new(deps, 2, Handle::current()).expect("Failed to start workers"),
            );
            (pool.clone(), None, Some(pool))
        } else {
            let recorder = Arc::new(RecordingQueue::default());
            (recorder.clone(), Some(recorder), None)
        };

        let router = build_router(AppState {
            store: store.clone(),
            storage_root: storage_root.clone(),
            pipeline: Pipeline::new(queue),
            queries: QueryService::new(analyzer, &storage_root),
            max_upload_bytes: 1024 * 1024,
        });

        Self {
            temp_dir,
            storage_root,
            store,
            provider,
            recorder,
            pool,
            router,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.storage_root.join(job_id)
    }

    async fn send(&self, request: Request<Body>) -> Response {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec();
        Response {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Uploads `content` as the multipart `file` field.
    pub async fn upload(&self, content: &str, content_type: &str) -> Response {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"spec\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/spec/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Uploads and returns the new job id.
    pub async fn upload_ok(&self, content: &str) -> String {
        let response = self.upload(content, "application/x-yaml").await;
        assert_eq!(response.status, StatusCode::OK, "upload failed: {:?}", response.json());
        response.json()["job_id"]
            .as_str()
            .expect("job_id missing")
            .to_string()
    }

    /// Polls the store until the job is terminal.
    pub async fn wait_for_terminal(&self, job_id: &str) -> JobState {
        for _ in 0..200 {
            if let Some(state) = self.store.get(job_id).unwrap() {
                if state.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} did not finish in time");
    }

    /// Polls the query endpoint until it stops answering 202.
    pub async fn wait_for_query(&self, job_id: &str) -> Response {
        let uri = format!("/api/spec/{job_id}/query");
        for _ in 0..200 {
            let response = self.get(&uri).await;
            if response.status != StatusCode::ACCEPTED {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("query for job {job_id} did not finish in time");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}
