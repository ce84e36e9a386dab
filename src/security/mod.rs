//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → forwarded.rs (trusted proxy → client identity)
//!     → cors.rs (preflight short-circuit, allow-origin)
//!     → headers.rs (hardening response headers)
//!     → rate_limit.rs (per-client ceiling under a prefix)
//!     → limits.rs (bounded JSON body parsing)
//!     → sanitize.rs (operator keys, markup)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: a failing check ends the forward pass
//! - No trust in client input

pub mod cors;
pub mod forwarded;
pub mod headers;
pub mod limits;
pub mod rate_limit;
pub mod sanitize;
