pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod llm;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod secrets;
pub mod state;
pub mod storage;
pub mod summary;
pub mod worker;

pub use api::{build_router, AppState};
pub use config::{load_settings, Environment, Settings};
pub use error::{ConfigError, Result, SpecDigestError, StorageError, WorkerError};
pub use llm::{CompletionProvider, LlmAnalyzer, LlmConfig, OpenAiProvider};
pub use parser::{parse_spec, ParsedSpec};
pub use pipeline::{Pipeline, PipelineDeps, RetryPolicy};
pub use query::QueryService;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use state::{JobState, StateStore, TaskState};
pub use storage::{ExportFormat, JobStorage};
pub use summary::SummaryDocument;
pub use worker::{TaskQueue, WorkerPool};
