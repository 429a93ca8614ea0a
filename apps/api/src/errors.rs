use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::decisions::pipeline::KanbanError;
use crate::llm_client::LlmError;
use crate::session::machine::TransitionError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal phase or status transition. Never coerced, always rejected.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Another generation call for the same session is still in flight.
    #[error("Session {0} already has a turn in flight")]
    SessionBusy(Uuid),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller may safely resend the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Llm(_) | AppError::SessionBusy(_))
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Llm(e.to_string())
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::EmptyField(_) | TransitionError::InvalidSetup(_) => {
                AppError::Validation(e.to_string())
            }
            _ => AppError::InvalidTransition(e.to_string()),
        }
    }
}

impl From<KanbanError> for AppError {
    fn from(e: KanbanError) -> Self {
        AppError::InvalidTransition(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", msg.clone())
            }
            AppError::SessionBusy(_) => (StatusCode::CONFLICT, "SESSION_BUSY", self.to_string()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Cache(e) => {
                tracing::error!("Redis error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CACHE_ERROR",
                    "A coordination error occurred".to_string(),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_ERROR",
                    "The AI provider failed to respond; the turn can be retried".to_string(),
                )
            }
            AppError::S3(msg) => {
                tracing::error!("S3 error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "S3_ERROR",
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
                "message": message,
                "retryable": retryable
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_and_busy_errors_are_retryable() {
        assert!(AppError::Llm("timeout".to_string()).is_retryable());
        assert!(AppError::SessionBusy(Uuid::new_v4()).is_retryable());
        assert!(!AppError::Validation("empty".to_string()).is_retryable());
        assert!(!AppError::InvalidTransition("H -> L".to_string()).is_retryable());
    }

    #[test]
    fn test_status_codes_follow_taxonomy() {
        let cases = [
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::InvalidTransition("x".into()), StatusCode::CONFLICT),
            (AppError::SessionBusy(Uuid::new_v4()), StatusCode::CONFLICT),
            (AppError::Llm("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::S3("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_transition_errors_split_validation_from_invariants() {
        let empty: AppError = TransitionError::EmptyField("action").into();
        assert!(matches!(empty, AppError::Validation(_)));

        let skip: AppError = TransitionError::NoDecisionCaptured.into();
        assert!(matches!(skip, AppError::InvalidTransition(_)));

        let twice: AppError = KanbanError::OutcomeAlreadyRecorded.into();
        assert_eq!(twice.into_response().status(), StatusCode::CONFLICT);
    }
}
