//! JSON body parsing with a size ceiling.
//!
//! # Responsibilities
//! - Parse `application/json` bodies into the request context
//! - Keep any other body as raw bytes for the sub-pipeline
//! - Enforce the maximum body size on both
//!
//! # Design Decisions
//! - A declared `Content-Length` over the limit is rejected before reading
//! - The body is read through a length-limited wrapper, never unbounded
//! - Oversized and malformed bodies are distinct errors (413 vs 400)

use axum::body::{Body, Bytes};
use axum::http::header;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::Value;

use crate::config::BodyConfig;
use crate::pipeline::{AppError, Flow, RequestContext, Stage, StageFuture};

/// Body parsing stage.
#[derive(Debug, Clone)]
pub struct JsonBodyParser {
    limit: usize,
}

impl JsonBodyParser {
    pub fn new(config: &BodyConfig) -> Self {
        Self {
            limit: config.limit_bytes,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Read the whole body, failing once it passes the ceiling.
    async fn read(&self, ctx: &RequestContext, body: Body) -> Result<Bytes, AppError> {
        let declared = ctx
            .header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.limit) {
            return Err(AppError::PayloadTooLarge { limit: self.limit });
        }

        match Limited::new(body, self.limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(AppError::PayloadTooLarge { limit: self.limit })
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request body aborted");
                Err(AppError::MalformedBody("request aborted".to_string()))
            }
        }
    }

    async fn parse(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let Some(body) = ctx.take_body() else {
            return Ok(());
        };
        let bytes = self.read(ctx, body).await?;

        if !is_json(ctx) {
            if !bytes.is_empty() {
                ctx.payload = Some(bytes);
            }
            return Ok(());
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            ctx.body = Some(Value::Object(Default::default()));
            return Ok(());
        }

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| AppError::MalformedBody(e.to_string()))?;
        if !(value.is_object() || value.is_array()) {
            return Err(AppError::MalformedBody(
                "JSON body must be an object or an array".to_string(),
            ));
        }
        ctx.body = Some(value);
        Ok(())
    }
}

impl Stage for JsonBodyParser {
    fn name(&self) -> &'static str {
        "body_parser"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            self.parse(ctx).await?;
            Ok(Flow::Continue)
        })
    }
}

fn is_json(ctx: &RequestContext) -> bool {
    ctx.header(header::CONTENT_TYPE.as_str())
        .and_then(|v| v.split(';').next())
        .map(|essence| {
            let essence = essence.trim().to_ascii_lowercase();
            essence == "application/json" || essence.ends_with("+json")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::forwarded::ProxyTrust;
    use axum::http::{Method, Request};
    use serde_json::json;

    fn parser() -> JsonBodyParser {
        JsonBodyParser::new(&BodyConfig { limit_bytes: 64 })
    }

    fn context(content_type: Option<&str>, body: impl Into<Body>) -> RequestContext {
        let mut builder = Request::builder().method(Method::POST).uri("/api/v1/user");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder.body(body.into()).unwrap();
        RequestContext::from_request(req, None, &ProxyTrust::new(false))
    }

    #[tokio::test]
    async fn test_parses_json() {
        let mut ctx = context(Some("application/json; charset=utf-8"), r#"{"name":"ada"}"#);
        parser().on_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.body, Some(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_body_at_limit_parses() {
        let payload = format!(r#"{{"k":"{}"}}"#, "x".repeat(64 - 8));
        assert_eq!(payload.len(), 64);
        let mut ctx = context(Some("application/json"), payload);
        parser().on_request(&mut ctx).await.unwrap();
        assert!(ctx.body.is_some());
    }

    #[tokio::test]
    async fn test_body_over_limit_is_too_large() {
        let payload = format!(r#"{{"k":"{}"}}"#, "x".repeat(64));
        let mut ctx = context(Some("application/json"), payload);
        let err = parser().on_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "100000")
            .body(Body::from("{}"))
            .unwrap();
        let mut ctx = RequestContext::from_request(req, None, &ProxyTrust::new(false));
        let err = parser().on_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let mut ctx = context(Some("application/json"), "{not json");
        let err = parser().on_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_scalar_json_is_rejected() {
        let mut ctx = context(Some("application/json"), "42");
        let err = parser().on_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_empty_json_body_is_empty_object() {
        let mut ctx = context(Some("application/json"), "");
        parser().on_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.body, Some(json!({})));
    }

    #[tokio::test]
    async fn test_non_json_is_kept_raw() {
        let mut ctx = context(Some("text/plain"), "hello upstream");
        parser().on_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.body, None);
        assert_eq!(ctx.payload.as_deref(), Some(&b"hello upstream"[..]));

        let mut ctx = context(None, Body::empty());
        parser().on_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.body, None);
        assert_eq!(ctx.payload, None);
    }

    #[tokio::test]
    async fn test_non_json_over_limit_is_too_large() {
        let mut ctx = context(Some("text/plain"), "x".repeat(1000));
        let err = parser().on_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 64 }));
        assert_eq!(ctx.payload, None);
    }
}
