//! Response compression.
//!
//! # Responsibilities
//! - Negotiate gzip or deflate from `Accept-Encoding`
//! - Compress compressible bodies above a size threshold
//!
//! # Design Decisions
//! - Only bodies with an exact known size are buffered, and only up to a cap;
//!   anything else is passed through untouched
//! - Any failure passes the response through uncompressed

use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression as Level;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use std::io::Write;

use crate::config::CompressionConfig;
use crate::pipeline::{Flow, RequestContext, Stage, StageFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    fn encode(self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Encoding::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), Level::default());
                enc.write_all(input)?;
                enc.finish()
            }
            Encoding::Deflate => {
                let mut enc = DeflateEncoder::new(Vec::new(), Level::default());
                enc.write_all(input)?;
                enc.finish()
            }
        }
    }
}

/// Pick an encoding from an `Accept-Encoding` header. Gzip wins ties.
pub fn negotiate(headers: &HeaderMap) -> Option<Encoding> {
    let accept = headers.get(header::ACCEPT_ENCODING)?.to_str().ok()?;

    let mut best: Option<(Encoding, f32)> = None;
    for item in accept.split(',') {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = parts
            .find_map(|p| p.trim().strip_prefix("q="))
            .and_then(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        if q <= 0.0 {
            continue;
        }
        let encoding = match coding.as_str() {
            "gzip" | "x-gzip" | "*" => Encoding::Gzip,
            "deflate" => Encoding::Deflate,
            _ => continue,
        };
        let better = match best {
            None => true,
            Some((current, best_q)) => q > best_q || (q == best_q && encoding == Encoding::Gzip && current != Encoding::Gzip),
        };
        if better {
            best = Some((encoding, q));
        }
    }
    best.map(|(encoding, _)| encoding)
}

fn is_compressible(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence.starts_with("text/")
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
        || matches!(
            essence.as_str(),
            "application/json" | "application/javascript" | "application/xml" | "image/svg+xml"
        )
}

/// Compression stage.
#[derive(Debug, Clone)]
pub struct Compression {
    threshold: usize,
    max_buffer: usize,
}

impl Compression {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            threshold: config.threshold_bytes,
            max_buffer: config.max_buffer_bytes,
        }
    }

    async fn compress(&self, ctx: &RequestContext, response: Response) -> Response {
        if ctx.method == Method::HEAD
            || matches!(response.status(), StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
            || response.headers().contains_key(header::CONTENT_ENCODING)
            || !is_compressible(response.headers())
            || no_transform(response.headers())
        {
            return response;
        }

        let Some(encoding) = negotiate(&ctx.headers) else {
            return response;
        };

        let size = response.body().size_hint().exact().map(|n| n as usize);
        match size {
            Some(n) if n >= self.threshold && n <= self.max_buffer => {}
            _ => return response,
        }

        let (mut parts, body) = response.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to buffer response for compression");
                return Response::from_parts(parts, Body::empty());
            }
        };

        let encoded = match encoding.encode(&bytes) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, encoding = encoding.as_str(), "Compression failed");
                return Response::from_parts(parts, Body::from(bytes));
            }
        };

        parts.headers.remove(header::CONTENT_LENGTH);
        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
        parts
            .headers
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        Response::from_parts(parts, Body::from(encoded))
    }
}

fn no_transform(headers: &HeaderMap) -> bool {
    headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("no-transform"))
        .unwrap_or(false)
}

impl Stage for Compression {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move { Ok(Flow::Continue) })
    }

    fn on_response<'a>(&'a self, ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(self.compress(ctx, response))
    }
}
