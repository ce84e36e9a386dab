//! Sub-pipelines mounted at path prefixes.
//!
//! # Responsibilities
//! - Hand matched requests to an opaque handler with the mount prefix stripped
//! - Forward to an upstream HTTP service (default handler)
//!
//! # Design Decisions
//! - Handlers see only sanitized input: query map and parsed body
//! - Non-JSON bodies pass through as raw bytes under the client's content type
//! - Hop-by-hop headers are not forwarded
//! - Connection failures and timeouts are upstream errors (502 / 504)

use axum::body::{Body, Bytes};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{AppError, RequestContext};
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// What a sub-pipeline receives.
#[derive(Debug, Clone)]
pub struct Delegation {
    pub method: Method,
    /// Prefix the request was mounted at.
    pub mount: String,
    /// Path below the mount prefix, always starting with `/`.
    pub path: String,
    /// Sanitized query parameters.
    pub query: Map<String, Value>,
    pub headers: HeaderMap,
    /// Sanitized JSON body, if one was sent.
    pub body: Option<Value>,
    /// Raw non-JSON body, if one was sent.
    pub payload: Option<Bytes>,
}

impl Delegation {
    /// Query map encoded back into `a=1&b=2` form.
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.query {
            match value {
                Value::Array(items) => {
                    for item in items {
                        serializer.append_pair(key, &scalar(item));
                    }
                }
                other => {
                    serializer.append_pair(key, &scalar(other));
                }
            }
        }
        Some(serializer.finish())
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An opaque request handler mounted at a path prefix.
pub trait SubPipeline: Send + Sync {
    fn call(&self, request: Delegation) -> BoxFuture<'_, Result<Response, AppError>>;
}

/// A named sub-pipeline bound to its prefix.
#[derive(Clone)]
pub struct Mount {
    name: String,
    matcher: PathPrefixMatcher,
    handler: Arc<dyn SubPipeline>,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("name", &self.name)
            .field("prefix", &self.matcher.prefix())
            .finish()
    }
}

impl Mount {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, handler: Arc<dyn SubPipeline>) -> Self {
        Self {
            name: name.into(),
            matcher: PathPrefixMatcher::new(prefix),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        self.matcher.prefix()
    }

    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.matcher.matches(ctx)
    }

    /// Build the delegation for a matching request.
    pub fn delegation(&self, ctx: &RequestContext) -> Delegation {
        let path = self.matcher.strip(&ctx.path).unwrap_or("/").to_string();
        Delegation {
            method: ctx.method.clone(),
            mount: self.prefix().to_string(),
            path,
            query: ctx.query.clone(),
            headers: ctx.headers.clone(),
            body: ctx.body.clone(),
            payload: ctx.payload.clone(),
        }
    }

    pub async fn dispatch(&self, ctx: &RequestContext) -> Result<Response, AppError> {
        let delegation = self.delegation(ctx);
        tracing::debug!(
            mount = %self.name,
            method = %delegation.method,
            path = %delegation.path,
            "Delegating request"
        );
        self.handler.call(delegation).await
    }
}

/// Forwards delegated requests to an upstream HTTP service.
#[derive(Clone)]
pub struct UpstreamMount {
    authority: Authority,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl UpstreamMount {
    pub fn new(upstream: &str, client: Client<HttpConnector, Body>, timeout: Duration) -> Result<Self, AppError> {
        let authority = upstream
            .parse::<Authority>()
            .map_err(|e| AppError::internal(format!("invalid upstream '{}': {}", upstream, e)))?;
        Ok(Self {
            authority,
            client,
            timeout,
        })
    }

    /// Shared HTTP/1.1 client for every upstream mount.
    pub fn client() -> Client<HttpConnector, Body> {
        Client::builder(TokioExecutor::new()).build(HttpConnector::new())
    }

    fn build_request(&self, delegation: &Delegation) -> Result<Request<Body>, AppError> {
        let mut target = format!("{}{}", delegation.mount, delegation.path);
        if target.len() > 1 && target.ends_with('/') && delegation.path == "/" {
            target.pop();
        }
        if let Some(query) = delegation.query_string() {
            target.push('?');
            target.push_str(&query);
        }
        let path_and_query = target.parse::<PathAndQuery>().map_err(AppError::internal)?;
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(AppError::internal)?;

        let mut builder = Request::builder().method(delegation.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in delegation.headers.iter() {
                if !HOP_BY_HOP.contains(&name.as_str()) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }

        let body = match (&delegation.body, &delegation.payload) {
            (Some(value), _) => {
                let bytes = serde_json::to_vec(value).map_err(AppError::internal)?;
                if let Some(headers) = builder.headers_mut() {
                    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                }
                Body::from(bytes)
            }
            (None, Some(raw)) => {
                if let Some(headers) = builder.headers_mut() {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(raw.len()));
                }
                Body::from(raw.clone())
            }
            (None, None) => Body::empty(),
        };
        builder.body(body).map_err(AppError::internal)
    }
}

impl SubPipeline for UpstreamMount {
    fn call(&self, request: Delegation) -> BoxFuture<'_, Result<Response, AppError>> {
        Box::pin(async move {
            let req = self.build_request(&request)?;
            let upstream = self.authority.to_string();

            match tokio::time::timeout(self.timeout, self.client.request(req)).await {
                Ok(Ok(response)) => Ok(relay(response)),
                Ok(Err(e)) => {
                    tracing::error!(upstream = %upstream, error = %e, "Upstream error");
                    Err(AppError::upstream(StatusCode::BAD_GATEWAY, "Upstream request failed"))
                }
                Err(_) => {
                    tracing::error!(upstream = %upstream, timeout = ?self.timeout, "Upstream timed out");
                    Err(AppError::upstream(StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out"))
                }
            }
        })
    }
}

/// Upstream response with connection-level headers removed.
fn relay(response: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    for name in HOP_BY_HOP.iter().filter(|n| **n != "content-length") {
        parts.headers.remove(*name);
    }
    Response::from_parts(parts, Body::new(body))
}
