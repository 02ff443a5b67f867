use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("No API key configured for the completion provider")]
    MissingApiKey,

    #[error("Completion provider rejected credentials: {0}")]
    Auth(String),

    #[error("Completion provider rate limit exceeded after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("Completion provider returned HTTP {status}: {body}")]
    Request { status: u16, body: String },

    #[error("Completion provider server error HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Completion request failed: {0}")]
    Transport(String),

    #[error("Invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("Failed to build retrieval index: {0}")]
    IndexCreation(String),
}

impl LlmError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Transport(_)
        )
    }
}
