use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::LlmConfig;
use super::error::LlmError;
use super::index::RetrievalIndex;
use super::prompts::{endpoint_prompt, overview_prompt, query_prompt, SYSTEM_PROMPT};
use super::provider::CompletionProvider;
use crate::parser::ParsedSpec;
use crate::pipeline::progress::ProgressReporter;
use crate::state::Stage;

/// Share of the analysis stage spent on the overview call.
const OVERVIEW_PROGRESS: f64 = 20.0;
/// Progress reported once every endpoint has been analyzed.
const ENDPOINTS_DONE_PROGRESS: f64 = 95.0;
const QUERY_PASSAGES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointAnalysis {
    pub path: String,
    pub method: String,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecAnalysis {
    pub overview: String,
    pub endpoints: Vec<EndpointAnalysis>,
}

/// Turns a parsed specification into natural-language documentation.
#[derive(Clone)]
pub struct LlmAnalyzer {
    provider: Arc<dyn CompletionProvider>,
    config: LlmConfig,
}

impl LlmAnalyzer {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: LlmConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// One overview completion, then one completion per endpoint.
    pub async fn analyze(
        &self,
        spec: &ParsedSpec,
        progress: &dyn ProgressReporter,
    ) -> Result<SpecAnalysis, LlmError> {
        info!(title = %spec.title, endpoints = spec.endpoints.len(), "Generating API overview");
        let overview = self
            .provider
            .complete(SYSTEM_PROMPT, &overview_prompt(spec), &self.config)
            .await?;
        progress.report(Stage::Analysis, OVERVIEW_PROGRESS, "Overview generated");

        let total = spec.endpoints.len();
        let mut endpoints = Vec::with_capacity(total);
        for (i, endpoint) in spec.endpoints.iter().enumerate() {
            debug!(method = %endpoint.method, path = %endpoint.path, "Analyzing endpoint");
            let analysis = self
                .provider
                .complete(SYSTEM_PROMPT, &endpoint_prompt(endpoint), &self.config)
                .await?;
            endpoints.push(EndpointAnalysis {
                path: endpoint.path.clone(),
                method: endpoint.method.clone(),
                analysis,
            });

            let done = (i + 1) as f64 / total as f64;
            progress.report(
                Stage::Analysis,
                OVERVIEW_PROGRESS + (ENDPOINTS_DONE_PROGRESS - OVERVIEW_PROGRESS) * done,
                &format!("Analyzed {} {}", endpoint.method, endpoint.path),
            );
        }

        Ok(SpecAnalysis {
            overview,
            endpoints,
        })
    }

    /// Answers a free-form question from the best matching passages.
    pub async fn answer_query(
        &self,
        index: &RetrievalIndex,
        question: &str,
    ) -> Result<String, LlmError> {
        let mut excerpts: Vec<&str> = index
            .search(question, QUERY_PASSAGES)
            .into_iter()
            .map(|p| p.text.as_str())
            .collect();
        if excerpts.is_empty() {
            excerpts = index
                .passages()
                .iter()
                .take(QUERY_PASSAGES)
                .map(|p| p.text.as_str())
                .collect();
        }

        debug!(excerpts = excerpts.len(), "Answering query");
        self.provider
            .complete(SYSTEM_PROMPT, &query_prompt(question, &excerpts), &self.config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::parser::parse_spec;

    #[derive(Default)]
    struct EchoProvider {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for EchoProvider {
        async fn complete(
            &self,
            _system: &str,
            prompt: &str,
            _config: &LlmConfig,
        ) -> Result<String, LlmError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(format!("answer {}", prompts.len()))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(&self, _: &str, _: &str, _: &LlmConfig) -> Result<String, LlmError> {
            Err(LlmError::RateLimited { attempts: 5 })
        }
    }

    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<f64>>);

    impl ProgressReporter for RecordingProgress {
        fn report(&self, _stage: Stage, progress: f64, _message: &str) {
            self.0.lock().unwrap().push(progress);
        }
    }

    const SPEC: &str = r#"
openapi: 3.0.0
info: {title: Shop, version: '1'}
paths:
  /items:
    get: {summary: List items, responses: {}}
    post: {summary: Create item, responses: {}}
"#;

    #[tokio::test]
    async fn test_analyze_calls_overview_then_each_endpoint() {
        let provider = Arc::new(EchoProvider::default());
        let analyzer = LlmAnalyzer::new(provider.clone(), LlmConfig::default());
        let progress = RecordingProgress::default();

        let analysis = analyzer
            .analyze(&parse_spec(SPEC).unwrap(), &progress)
            .await
            .unwrap();

        assert_eq!(analysis.overview, "answer 1");
        assert_eq!(analysis.endpoints.len(), 2);
        assert_eq!(analysis.endpoints[1].method, "POST");
        assert_eq!(analysis.endpoints[1].analysis, "answer 3");

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("comprehensive overview"));
        assert!(prompts[2].contains("POST /items"));

        let reported = progress.0.lock().unwrap();
        assert_eq!(reported.len(), 3);
        assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let analyzer = LlmAnalyzer::new(Arc::new(FailingProvider), LlmConfig::default());
        let err = analyzer
            .analyze(
                &parse_spec(SPEC).unwrap(),
                &crate::pipeline::progress::NoopProgress,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { attempts: 5 }));
    }

    #[tokio::test]
    async fn test_answer_query_uses_matching_passages() {
        let provider = Arc::new(EchoProvider::default());
        let analyzer = LlmAnalyzer::new(provider.clone(), LlmConfig::default());
        let index = RetrievalIndex::build(SPEC).unwrap();

        let answer = analyzer.answer_query(&index, "How to create items?").await.unwrap();
        assert_eq!(answer, "answer 1");
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("Create item"));
        assert!(prompts[0].ends_with("Question: How to create items?"));
    }
}
