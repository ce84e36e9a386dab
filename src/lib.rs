//! Stand web server library.
//!
//! A JSON API front door: every request runs through an ordered pipeline of
//! security and parsing stages before it is routed to a mounted sub-pipeline.

// Core subsystems
pub mod config;
pub mod http;
pub mod pipeline;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{AppError, Pipeline, RequestContext};
