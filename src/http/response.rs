//! Terminal error handling.
//!
//! # Responsibilities
//! - Turn any [`AppError`] into the uniform JSON error response
//! - Log defects with full detail, never leak them to clients
//!
//! # Design Decisions
//! - `fail` for client errors, `error` for server errors
//! - Operational errors keep their status and message
//! - Defects become a generic 500

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;
use crate::pipeline::error::GENERIC_MESSAGE;
use crate::pipeline::{AppError, RequestContext};

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

/// Render `err` as the final response for `ctx`.
pub fn error_response(ctx: &RequestContext, err: AppError) -> Response {
    let status = err.status_code();
    metrics::record_error(err.kind());

    let message = if err.is_operational() {
        tracing::debug!(
            request_id = ctx.request_id().unwrap_or("unknown"),
            status = status.as_u16(),
            error = %err,
            "Request failed"
        );
        err.to_string()
    } else {
        tracing::error!(
            request_id = ctx.request_id().unwrap_or("unknown"),
            method = %ctx.method,
            url = %ctx.original_url,
            client = %ctx.client_key(),
            error = ?err,
            "Unhandled error"
        );
        GENERIC_MESSAGE.to_string()
    };

    let label = if status.is_client_error() { "fail" } else { "error" };
    let body = ErrorBody {
        status: label.to_string(),
        message,
    };
    (status, Json(body)).into_response()
}
