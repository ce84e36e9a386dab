//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (method, path, sanitized query/body)
//!     → router.rs (root view, then mounts in order)
//!     → matcher.rs (exact path or segment-aware prefix)
//!     → mount.rs (strip prefix, delegate to sub-pipeline)
//!     → Return: Complete(response) or Continue
//! ```
//!
//! # Design Decisions
//! - Mounts built at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - First match wins (configuration order)

pub mod matcher;
pub mod mount;
pub mod router;
pub mod view;

pub use mount::{Delegation, Mount, SubPipeline, UpstreamMount};
pub use router::{Dispatcher, NotFoundFallback, RootView};
pub use view::{TemplateDir, ViewError, ViewRenderer};
