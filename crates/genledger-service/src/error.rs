//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use genledger_core::CoreError;
use genledger_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials or signature.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - authenticated but not the owner.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Insufficient credits.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        available: i64,
        /// Required amount.
        required: i64,
    },

    /// An upstream service could not be reached or timed out.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// What failed.
        message: String,
        /// Extra context for the client (e.g. the failed job id).
        details: Option<serde_json::Value>,
    },

    /// An upstream service answered with an error.
    #[error("upstream rejected: {message}")]
    UpstreamRejected {
        /// What failed.
        message: String,
        /// Extra context for the client.
        details: Option<serde_json::Value>,
    },

    /// The callback was already processed; acknowledged without effect.
    #[error("already processed")]
    AlreadyProcessed,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Attach client-facing details to an upstream error.
    #[must_use]
    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            Self::UpstreamUnavailable { message, .. } => Self::UpstreamUnavailable {
                message,
                details: Some(details),
            },
            Self::UpstreamRejected { message, .. } => Self::UpstreamRejected {
                message,
                details: Some(details),
            },
            other => other,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
            Self::AlreadyProcessed => StatusCode::OK,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message, details) = match self {
            Self::Unauthorized => ("unauthorized", "unauthorized".to_string(), None),
            Self::Forbidden => ("forbidden", "forbidden".to_string(), None),
            Self::NotFound(msg) => ("not_found", msg, None),
            Self::BadRequest(msg) => ("bad_request", msg, None),
            Self::InsufficientCredits {
                available,
                required,
            } => (
                "insufficient_credits",
                format!("insufficient credits: available={available}, required={required}"),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::UpstreamUnavailable { message, details } => {
                tracing::warn!(error = %message, "Upstream unavailable");
                ("upstream_unavailable", message, details)
            }
            Self::UpstreamRejected { message, details } => {
                tracing::warn!(error = %message, "Upstream rejected request");
                ("upstream_rejected", message, details)
            }
            Self::AlreadyProcessed => {
                return (
                    status,
                    Json(serde_json::json!({ "received": true, "duplicate": true })),
                )
                    .into_response();
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            StoreError::Duplicate { key } => Self::BadRequest(format!("duplicate record: {key}")),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
