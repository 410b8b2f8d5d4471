//! API error types and response formatting.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Authentication failed (missing or invalid token).
    #[error("unauthorized")]
    Unauthorized,

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A recipe with this name already exists.
    #[error("duplicate name: {0}")]
    Duplicate(String),

    /// The remote dataset cannot be consulted safely right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (storage, etc.).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<larder_ingest::Error> for ApiError {
    fn from(err: larder_ingest::Error) -> Self {
        use larder_ingest::Error as E;
        match err {
            E::DuplicateName { name } => Self::Duplicate(name),
            E::InvalidRecipe(e) => Self::BadRequest(e.to_string()),
            E::StoreUnavailable(reason) => Self::Unavailable(reason),
            other => Self::Internal(other.into()),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            Self::Duplicate(name) => (
                StatusCode::CONFLICT,
                "duplicate_name",
                Some(format!("a recipe named '{name}' already exists")),
            ),
            Self::Unavailable(reason) => {
                tracing::warn!(reason = %reason, "rejecting request: store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    Some("The authoritative store cannot be reached; retry later".to_string()),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
