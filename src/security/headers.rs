//! Security response headers.
//!
//! # Responsibilities
//! - Add a fixed set of hardening headers to every response
//! - Strip `X-Powered-By`
//!
//! # Design Decisions
//! - Never fails, never short-circuits
//! - A header already set further down the chain is left untouched

use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::pipeline::{Flow, RequestContext, Stage, StageFuture};

const CONTENT_SECURITY_POLICY: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests";

/// Header set applied to every response.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", CONTENT_SECURITY_POLICY),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Security header injection stage.
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move { Ok(Flow::Continue) })
    }

    fn on_response<'a>(&'a self, _ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let headers = response.headers_mut();
            headers.remove("x-powered-by");
            for (name, value) in SECURITY_HEADERS {
                let name = HeaderName::from_static(name);
                if !headers.contains_key(&name) {
                    headers.insert(name, HeaderValue::from_static(value));
                }
            }
            response
        })
    }
}
