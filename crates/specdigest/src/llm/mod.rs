//! LLM-backed analysis: provider seam, prompts, analyzer and the
//! retrieval index used for follow-up questions.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod index;
pub mod prompts;
pub mod provider;

pub use analyzer::{EndpointAnalysis, LlmAnalyzer, SpecAnalysis};
pub use config::LlmConfig;
pub use error::LlmError;
pub use index::{content_hash, IndexCache, RetrievalIndex};
pub use provider::{CompletionProvider, OpenAiProvider, DEFAULT_BASE_URL};
