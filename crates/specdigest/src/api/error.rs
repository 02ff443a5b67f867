//! HTTP error mapping. Every error body is `{"detail": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::StorageError;
use crate::state::StateError;

pub const JOB_NOT_FOUND: &str = "Job not found";
const INTERNAL_DETAIL: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    ServiceUnavailable(String),
    /// A job or query failed; the detail is shown to the client.
    JobFailed(String),
    /// Unexpected; the detail is logged, the client sees a generic message.
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn job_not_found() -> Self {
        Self::NotFound(JOB_NOT_FOUND.to_string())
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::JobFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        Self::Internal(format!("state store: {e}"))
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidJobId(_) => Self::job_not_found(),
            other => Self::Internal(format!("storage: {other}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            Self::Internal(detail) => {
                error!(%detail, "Request failed");
                INTERNAL_DETAIL.to_string()
            }
            Self::BadRequest(d)
            | Self::NotFound(d)
            | Self::Unprocessable(d)
            | Self::ServiceUnavailable(d)
            | Self::JobFailed(d) => d,
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
