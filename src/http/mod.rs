//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tower layers, catch-all handler)
//!     → request.rs (request ID)
//!     → assets.rs (static files, first stage)
//!     → [security and routing stages]
//!     → compression.rs (on the way out)
//!     → response.rs (terminal error rendering)
//!     → Send to client
//! ```

pub mod assets;
pub mod compression;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::{HttpServer, ServerError, Services};
