use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::error::{PipelineError, StageFailure};

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e {
            PipelineError::UnsupportedFormat(_) => AppError::UnsupportedMediaType(message),
            PipelineError::CorruptDocument(_) | PipelineError::ExtractionFailed { .. } => {
                AppError::UnprocessableEntity(message)
            }
            PipelineError::LlmUnavailable { .. } | PipelineError::EmbeddingUnavailable { .. } => {
                AppError::ServiceUnavailable(message)
            }
            PipelineError::NotReady { .. }
            | PipelineError::EntityBusy { .. }
            | PipelineError::Cancelled => AppError::Conflict(message),
            PipelineError::NotFound { .. } => AppError::NotFound(message),
            PipelineError::Storage(_) | PipelineError::Archive(_) | PipelineError::Lock(_) => {
                AppError::Storage(message)
            }
            PipelineError::CapabilityRejected { .. }
            | PipelineError::IncompleteRecord { .. }
            | PipelineError::InvalidTransition(_) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<StageFailure> for AppError {
    fn from(failure: StageFailure) -> Self {
        let message = failure.to_string();
        match AppError::from(failure.error) {
            AppError::NotFound(_) => AppError::NotFound(message),
            AppError::UnprocessableEntity(_) => AppError::UnprocessableEntity(message),
            AppError::UnsupportedMediaType(_) => AppError::UnsupportedMediaType(message),
            AppError::Conflict(_) => AppError::Conflict(message),
            AppError::ServiceUnavailable(_) => AppError::ServiceUnavailable(message),
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::UnsupportedMediaType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Capability unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    msg.clone(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
