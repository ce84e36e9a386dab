//! Cross-origin resource sharing.
//!
//! # Responsibilities
//! - Answer `OPTIONS` preflights for any path, without further stages
//! - Attach the allow-origin header to every other response
//!
//! # Design Decisions
//! - Negotiation is delegated to `tower_http::cors`, driven per request
//! - Default policy allows every origin; an explicit list narrows it
//! - Unlisted origins simply get no allow-origin header
//! - Preflights answer 204 with an empty body

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use std::convert::Infallible;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::pipeline::{AppError, Flow, RequestContext, Stage, StageFuture};

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

/// CORS negotiation stage.
#[derive(Debug, Clone)]
pub struct Cors {
    layer: CorsLayer,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> Self {
        let origin = if config.allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            let origins = config.allowed_origins.iter().filter_map(|o| {
                let trimmed = o.trim_end_matches('/');
                match HeaderValue::from_str(trimmed) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %o, "Ignoring unusable CORS origin");
                        None
                    }
                }
            });
            AllowOrigin::list(origins.collect::<Vec<_>>())
        };

        let mut layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(ALLOWED_METHODS)
            .allow_headers(AllowHeaders::mirror_request());
        if let Some(secs) = config.max_age_secs {
            layer = layer.max_age(Duration::from_secs(secs));
        }
        Self { layer }
    }

    /// Run the CORS middleware around an inner service that answers with `response`.
    async fn negotiate(&self, request: Request<Body>, response: Response) -> Response {
        let mut held = Some(response);
        let inner = service_fn(move |_request: Request<Body>| {
            let response = held.take().unwrap_or_else(|| Response::new(Body::empty()));
            async move { Ok::<_, Infallible>(response) }
        });

        match self.layer.layer(inner).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    async fn preflight(&self, ctx: &RequestContext) -> Result<Response, AppError> {
        let request = request_line(ctx)?;
        let mut response = self.negotiate(request, Response::new(Body::empty())).await;
        *response.status_mut() = StatusCode::NO_CONTENT;
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        Ok(response)
    }
}

/// Bodiless copy of the request, enough for origin negotiation.
fn request_line(ctx: &RequestContext) -> Result<Request<Body>, AppError> {
    let mut request = Request::builder()
        .method(ctx.method.clone())
        .uri(ctx.original_url.as_str())
        .body(Body::empty())
        .map_err(AppError::internal)?;
    *request.headers_mut() = ctx.headers.clone();
    Ok(request)
}

impl Stage for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if ctx.method == Method::OPTIONS {
                return Ok(Flow::Complete(self.preflight(ctx).await?));
            }
            Ok(Flow::Continue)
        })
    }

    fn on_response<'a>(&'a self, ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if ctx.method == Method::OPTIONS {
                return response;
            }
            match request_line(ctx) {
                Ok(request) => self.negotiate(request, response).await,
                Err(err) => {
                    tracing::warn!(error = %err, "CORS negotiation skipped");
                    response
                }
            }
        })
    }
}
