use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

/// API-facing error taxonomy. Every variant maps to a machine-readable
/// `kind` plus a human-readable message; internal errors are logged and
/// masked so no stack traces or internal identifiers leak to callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    /// Entity exists but is in a terminal state for this operation
    /// (e.g. accepting an invite that was already accepted or rejected).
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("workspace is at full capacity")]
    CapacityExceeded,
    #[error("invitation has expired")]
    Expired,
    #[error("file exceeds the maximum upload size")]
    PayloadTooLarge,
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvalidState(_) => "invalid_state",
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::CapacityExceeded => "capacity_exceeded",
            ApiError::Expired => "expired",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) | ApiError::InvalidState(_) | ApiError::CapacityExceeded => {
                StatusCode::CONFLICT
            }
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Expired => StatusCode::GONE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!(err = ?e, "internal error");
        }
        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.kind() == sqlx::error::ErrorKind::UniqueViolation {
                return ApiError::Conflict("resource already exists".to_string());
            }
        }
        ApiError::Internal(e.into())
    }
}
