//! Request-level error taxonomy.
//!
//! Every stage either continues or fails with exactly one [`AppError`]. The
//! runner routes the failure to the terminal error handler, which is the only
//! place an error becomes a response.

use axum::http::StatusCode;
use std::time::Duration;

/// Message shown to clients in place of internal defect details.
pub const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// Errors raised by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Body exceeded the configured ceiling.
    #[error("request entity too large")]
    PayloadTooLarge { limit: usize },

    /// Body could not be parsed.
    #[error("{0}")]
    MalformedBody(String),

    /// Client exceeded its rate-limit quota.
    #[error("{message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Duration,
    },

    /// Nothing claimed the request.
    #[error("{path} is not a valid endpoint")]
    NotFound { path: String },

    /// The request took longer than the configured deadline.
    #[error("Request timed out")]
    Timeout,

    /// A delegated sub-pipeline failed.
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    /// Anything unexpected. Never shown verbatim to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn upstream(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Upstream { status, .. } => *status,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operational errors are expected conditions whose message is safe to
    /// return to the client.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }

    /// Stable label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::PayloadTooLarge { .. } | AppError::MalformedBody(_) => "validation",
            AppError::RateLimitExceeded { .. } => "rate_limited",
            AppError::NotFound { .. } => "not_found",
            AppError::Timeout => "timeout",
            AppError::Upstream { .. } => "upstream",
            AppError::Internal(_) => "internal",
        }
    }
}
