//! Engine error taxonomy
//!
//! Typed errors shared across the engine. Recoverable per-turn failures
//! (provider errors) are caught at the orchestration boundary and coerce the
//! session back to listening; everything else maps to an HTTP status at the
//! API edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request or config value
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Authenticated but not allowed
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Entity absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Concurrent-call or plan-limit violation
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Non-2xx or timeout from an STT/LLM/TTS/tool server.
    /// Recoverable inside a session: the turn fails, the call continues.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// Client disconnect or socket failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Irrecoverable engine failure
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable code used in `error` events and API bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::Provider { .. } => "provider_error",
            Self::Transport(_) => "transport_error",
            Self::Fatal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuotaExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Provider { .. } => StatusCode::BAD_GATEWAY,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code(), "message": self.to_string() }
        }));
        (self.status(), body).into_response()
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("row not found".to_string()),
            other => Self::Fatal(format!("database error: {}", other)),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("invalid JSON: {}", e))
    }
}
