use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::jobs::TransitionError;
use crate::domain::ValidationErrors;
use crate::store::RepositoryError;
use crate::tasks::QueueClosed;

/// Error returned by the `/api/v1` handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("{0}")]
    Action(String),
    #[error("{0}")]
    MalformedBody(String),
    #[error("Authentication credentials were not provided.")]
    MissingCredentials,
    #[error("Invalid API key.")]
    InvalidKey,
    #[error("Not found.")]
    NotFound,
    #[error("ETL job not found")]
    JobNotFound,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!(errors))).into_response()
            }
            ApiError::Action(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::MalformedBody(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::MissingCredentials | ApiError::InvalidKey => {
                let payload = json!({ "detail": self.to_string() });
                (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
            }
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." }))).into_response()
            }
            ApiError::JobNotFound => {
                let payload = json!({ "error": "ETL job not found" });
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                let payload = json!({ "error": message });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<TransitionError> for ApiError {
    fn from(value: TransitionError) -> Self {
        Self::Action(value.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<QueueClosed> for ApiError {
    fn from(value: QueueClosed) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::MalformedBody(format!("JSON parse error - {}", value.body_text()))
    }
}
