//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages and the HTTP host produce:
//!     → logging.rs (structured log events, dev request log)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows through every log line via the trace span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
