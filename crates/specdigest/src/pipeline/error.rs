use thiserror::Error;

use crate::error::StorageError;
use crate::llm::LlmError;
use crate::parser::SpecValidationError;
use crate::state::StateError;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid specification: {0}")]
    Spec(#[from] SpecValidationError),

    #[error("Analysis failed: {0}")]
    Llm(#[from] LlmError),

    #[error("State store failed: {0}")]
    State(#[from] StateError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Missing input: {0}")]
    MissingInput(String),
}

impl StageError {
    /// Whether another attempt of the same stage could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Spec(_) | StageError::MissingInput(_) => false,
            StageError::Llm(e) => e.is_retryable(),
            StageError::State(_) | StageError::Storage(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!StageError::Spec(SpecValidationError::MissingInfo).is_retryable());
        assert!(!StageError::MissingInput("spec".into()).is_retryable());
        assert!(StageError::Llm(LlmError::RateLimited { attempts: 5 }).is_retryable());
        assert!(!StageError::Llm(LlmError::Auth("bad key".into())).is_retryable());
        assert!(StageError::Storage(StorageError::SummaryMissing("j".into())).is_retryable());
    }
}
