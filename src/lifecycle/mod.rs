//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain connections → Stop background tasks
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
