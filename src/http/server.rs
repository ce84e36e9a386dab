//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the stage pipeline from configuration
//! - Create the Axum router with a single catch-all handler
//! - Wire up tower layers (tracing, request ID)
//! - Bind server to listener and shut down gracefully
//! - Run the rate-limit janitor alongside the server

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::http::assets::StaticFiles;
use crate::http::compression::Compression;
use crate::http::request::MakeRequestUuidV4;
use crate::observability::{logging::RequestLogger, metrics};
use crate::pipeline::{AppError, Pipeline, RequestContext};
use crate::routing::{Dispatcher, Mount, NotFoundFallback, RootView, TemplateDir, UpstreamMount, ViewError, ViewRenderer};
use crate::security::cors::Cors;
use crate::security::forwarded::ProxyTrust;
use crate::security::headers::SecurityHeaders;
use crate::security::limits::JsonBodyParser;
use crate::security::rate_limit::{run_janitor, Clock, MemoryStore, RateLimitStore, RateLimiter, SystemClock};
use crate::security::sanitize::{MarkupEscaper, OperatorKeyFilter};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to load views: {0}")]
    Views(#[from] ViewError),
    #[error("invalid mount '{name}': {source}")]
    Mount { name: String, source: AppError },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub trust: ProxyTrust,
}

/// Collaborators the pipeline is assembled from.
///
/// Built from configuration in production; tests swap in fakes.
#[derive(Clone)]
pub struct Services {
    pub mounts: Vec<Mount>,
    pub views: Arc<dyn ViewRenderer>,
    pub rate_limit_store: Arc<dyn RateLimitStore>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Upstream mounts, views from disk, in-memory rate-limit store.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        let views: Arc<dyn ViewRenderer> = match &config.assets.views_dir {
            Some(dir) => Arc::new(TemplateDir::load(dir)?),
            None => Arc::new(TemplateDir::builtin()),
        };

        let client = UpstreamMount::client();
        let timeout = Duration::from_secs(config.server.upstream_timeout_secs);
        let mut mounts = Vec::with_capacity(config.mounts.len());
        for mount in &config.mounts {
            let upstream = UpstreamMount::new(&mount.upstream, client.clone(), timeout).map_err(|source| {
                ServerError::Mount {
                    name: mount.name.clone(),
                    source,
                }
            })?;
            mounts.push(Mount::new(mount.name.clone(), mount.prefix.clone(), Arc::new(upstream)));
        }

        Ok(Self {
            mounts,
            views,
            rate_limit_store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        })
    }
}

/// HTTP server for the application.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    services: Services,
}

impl HttpServer {
    /// Create a new HTTP server with services built from the configuration.
    pub fn new(config: AppConfig) -> Result<Self, ServerError> {
        let services = Services::from_config(&config)?;
        Ok(Self::with_services(config, services))
    }

    /// Create a new HTTP server around the given services.
    pub fn with_services(config: AppConfig, services: Services) -> Self {
        let pipeline = Self::build_pipeline(&config, &services);
        tracing::info!(stages = ?pipeline.stage_names(), "Pipeline assembled");

        let state = AppState {
            pipeline: Arc::new(pipeline),
            trust: ProxyTrust::new(config.server.trust_proxy),
        };
        let router = Self::build_router(state);
        Self {
            router,
            config,
            services,
        }
    }

    /// Assemble the ordered stage chain.
    pub fn build_pipeline(config: &AppConfig, services: &Services) -> Pipeline {
        let mut pipeline = Pipeline::new().with_timeout(Duration::from_secs(config.server.request_timeout_secs));

        if let Some(dir) = &config.assets.static_dir {
            match StaticFiles::new(dir) {
                Some(assets) => pipeline = pipeline.stage(assets),
                None => tracing::debug!(dir = %dir, "Static directory missing, assets disabled"),
            }
        }

        let rate_limiter = RateLimiter::new(
            &config.rate_limit,
            services.rate_limit_store.clone(),
            services.clock.clone(),
        );
        let dispatcher = Dispatcher::new(
            RootView::new(config.assets.root_view.clone(), config.assets.title.clone()),
            services.views.clone(),
            services.mounts.clone(),
        );

        pipeline
            .stage(Cors::new(&config.cors))
            .stage_if(config.security.enable_headers, SecurityHeaders::new())
            .stage_if(config.server.environment.is_development(), RequestLogger)
            .stage_if(config.rate_limit.enabled, rate_limiter)
            .stage(JsonBodyParser::new(&config.body))
            .stage(OperatorKeyFilter)
            .stage(MarkupEscaper)
            .stage_if(config.compression.enabled, Compression::new(&config.compression))
            .stage(dispatcher)
            .stage(NotFoundFallback)
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(pipeline_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
    }

    /// The router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = ?self.config.server.environment,
            "HTTP server starting"
        );

        if self.config.rate_limit.enabled {
            tokio::spawn(run_janitor(
                self.services.rate_limit_store.clone(),
                self.services.clock.clone(),
                Duration::from_secs(self.config.rate_limit.window_secs),
                shutdown.resubscribe(),
            ));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Single entry point: every request runs the whole pipeline.
async fn pipeline_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let method = request.method().to_string();

    let ctx = RequestContext::from_request(request, peer, &state.trust);
    tracing::debug!(
        request_id = ctx.request_id().unwrap_or("unknown"),
        method = %ctx.method,
        url = %ctx.original_url,
        client = %ctx.client_key(),
        "Handling request"
    );

    let response = state.pipeline.run(ctx).await;
    metrics::record_request(&method, response.status().as_u16(), start_time);
    response
}
