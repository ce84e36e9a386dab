//! Per-request context threaded through the pipeline.
//!
//! A context is created for every inbound request and dropped once the
//! response is sent. Stages may attach derived data but never remove fields a
//! later stage depends on.

use axum::body::{Body, Bytes};
use axum::http::{Extensions, HeaderMap, Method, Request};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Instant;

use crate::http::request::X_REQUEST_ID;
use crate::security::forwarded::ProxyTrust;

/// Mutable bag describing one request as it flows through the stages.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// URI path without the query string.
    pub path: String,
    /// Path and query as received.
    pub original_url: String,
    pub headers: HeaderMap,
    /// Query parameters. Repeated keys collapse into an array.
    pub query: Map<String, Value>,
    /// Parsed JSON body, set by the body parser.
    pub body: Option<Value>,
    /// Raw bytes of a non-JSON body, kept for forwarding.
    pub payload: Option<Bytes>,
    /// Client address, proxy-aware.
    pub client_ip: Option<IpAddr>,
    /// `http` or `https`, proxy-aware.
    pub scheme: String,
    /// Typed scratch space for stages.
    pub extensions: Extensions,
    started: Instant,
    // Mutex keeps the context Sync; the body itself is not.
    raw_body: Mutex<Option<Body>>,
}

impl RequestContext {
    /// Build the context from an incoming request.
    pub fn from_request(request: Request<Body>, peer: Option<SocketAddr>, trust: &ProxyTrust) -> Self {
        let (parts, body) = request.into_parts();

        let path = parts.uri.path().to_string();
        let original_url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| path.clone());
        let query = parts.uri.query().map(parse_query).unwrap_or_default();
        let client_ip = trust.client_ip(&parts.headers, peer);
        let scheme = trust.scheme(&parts.headers);

        Self {
            method: parts.method,
            path,
            original_url,
            headers: parts.headers,
            query,
            body: None,
            payload: None,
            client_ip,
            scheme,
            extensions: Extensions::new(),
            started: Instant::now(),
            raw_body: Mutex::new(Some(body)),
        }
    }

    /// Take the unread request body. Only the first caller gets it.
    pub fn take_body(&mut self) -> Option<Body> {
        match self.raw_body.get_mut() {
            Ok(body) => body.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Key used for per-client bookkeeping.
    pub fn client_key(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}

fn parse_query(raw: &str) -> Map<String, Value> {
    let mut query = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let value = Value::String(value.into_owned());
        match query.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                query.insert(key.into_owned(), value);
            }
        }
    }
    query
}
