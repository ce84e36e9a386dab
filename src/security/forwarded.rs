//! Reverse-proxy trust.
//!
//! # Responsibilities
//! - Derive the client address used for per-client bookkeeping
//! - Derive the request scheme
//!
//! # Design Decisions
//! - Resolved once at startup, immutable afterwards
//! - When trusted, the left-most `X-Forwarded-For` entry is the client
//! - When not trusted, forwarded headers are ignored entirely

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Whether `X-Forwarded-*` headers are honoured.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTrust {
    enabled: bool,
}

impl ProxyTrust {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Client address for this request.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
        if self.enabled {
            let forwarded = headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());
            if forwarded.is_some() {
                return forwarded;
            }
        }
        peer.map(|addr| addr.ip())
    }

    /// Request scheme (`http` unless a trusted proxy says otherwise).
    pub fn scheme(&self, headers: &HeaderMap) -> String {
        if self.enabled {
            if let Some(proto) = headers
                .get(X_FORWARDED_PROTO)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty())
            {
                return proto;
            }
        }
        "http".to_string()
    }
}
