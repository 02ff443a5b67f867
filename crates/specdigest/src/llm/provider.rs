//! Completion providers.
//!
//! The rest of the crate only sees [`CompletionProvider`]. [`OpenAiProvider`]
//! talks to any OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::LlmConfig;
use super::error::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Retries after the first attempt for rate limits, 5xx and network failures.
const MAX_RETRIES: u32 = 4;

/// Backoff before the first retry; doubles on each further retry.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Anything that turns a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, LlmError> {
        if api_key.expose_secret().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            max_retries: MAX_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// Overrides the retry budget and initial backoff.
    pub fn with_retry(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .unwrap_or_default())
    }
}

fn map_status(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { attempts: 1 },
        s if s.is_server_error() => LlmError::Server {
            status: s.as_u16(),
            body,
        },
        s => LlmError::Request {
            status: s.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&request).await {
                Ok(text) => {
                    debug!(model = %config.model, chars = text.len(), "Completion received");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.initial_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Completion request failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(LlmError::RateLimited { .. }) => {
                    return Err(LlmError::RateLimited {
                        attempts: attempt + 1,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};

    /// Serves `/chat/completions`, answering 429 for the first `fail_first` calls.
    async fn fake_server(fail_first: u32, status: HttpStatus) -> (String, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/chat/completions",
                post(
                    move |State(calls): State<Arc<AtomicU32>>,
                          Json(body): Json<serde_json::Value>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < fail_first {
                            return (status, Json(serde_json::json!({"error": "busy"})));
                        }
                        let model = body["model"].as_str().unwrap_or_default().to_string();
                        (
                            HttpStatus::OK,
                            Json(serde_json::json!({
                                "choices": [{"message": {"role": "assistant", "content": format!("  hello from {model}\n")}}]
                            })),
                        )
                    },
                ),
            )
            .with_state(calls.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    fn provider(base_url: &str, retries: u32) -> OpenAiProvider {
        OpenAiProvider::new(SecretString::from("test-key".to_string()), base_url)
            .unwrap()
            .with_retry(retries, Duration::from_millis(5))
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let result = OpenAiProvider::new(SecretString::from(String::new()), DEFAULT_BASE_URL);
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, String::new()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimited { .. }
        ));
        assert!(map_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!map_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[tokio::test]
    async fn test_completion_is_trimmed() {
        let (url, calls) = fake_server(0, HttpStatus::TOO_MANY_REQUESTS).await;
        let text = provider(&url, 0)
            .complete("sys", "prompt", &LlmConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "hello from gpt-4o-mini");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_with_backoff() {
        let (url, calls) = fake_server(2, HttpStatus::TOO_MANY_REQUESTS).await;
        let text = provider(&url, 3)
            .complete("sys", "prompt", &LlmConfig::default())
            .await
            .unwrap();
        assert!(text.starts_with("hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_cap() {
        let (url, calls) = fake_server(10, HttpStatus::TOO_MANY_REQUESTS).await;
        let err = provider(&url, 2)
            .complete("sys", "prompt", &LlmConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let (url, calls) = fake_server(10, HttpStatus::UNAUTHORIZED).await;
        let err = provider(&url, 3)
            .complete("sys", "prompt", &LlmConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
