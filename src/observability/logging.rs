//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Provide the development request logger stage
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level
//! - The request logger is added to the pipeline only in development mode;
//!   the decision is made once when the pipeline is built

use axum::http::header;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::pipeline::{Flow, RequestContext, Stage, StageFuture};

/// Install the global subscriber. Subsequent calls are ignored.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("stand_server={level},tower_http={level}", level = log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Development request logger: method, url, status, latency, size.
#[derive(Debug, Clone, Default)]
pub struct RequestLogger;

impl Stage for RequestLogger {
    fn name(&self) -> &'static str {
        "request_logger"
    }

    fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move { Ok(Flow::Continue) })
    }

    fn on_response<'a>(&'a self, ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let latency = ctx.started().elapsed();
            let length = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info!(
                target: "stand_server::access",
                method = %ctx.method,
                url = %ctx.original_url,
                status = response.status().as_u16(),
                latency_ms = latency.as_secs_f64() * 1000.0,
                length,
                "request"
            );
            response
        })
    }
}
