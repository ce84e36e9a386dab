//! Shared utilities for integration tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use stand_server::config::AppConfig;
use stand_server::http::{HttpServer, Services};
use stand_server::lifecycle::Shutdown;
use stand_server::pipeline::AppError;
use stand_server::routing::{Delegation, Mount, SubPipeline, TemplateDir};
use stand_server::security::rate_limit::{Clock, ManualClock, MemoryStore};

/// Config with no filesystem dependencies.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.assets.static_dir = None;
    config.assets.views_dir = None;
    config
}

/// In-process sub-pipeline that records what it was handed and echoes it.
#[derive(Default)]
pub struct RecordingMount {
    seen: Mutex<Vec<Delegation>>,
}

impl RecordingMount {
    pub fn seen(&self) -> Vec<Delegation> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl SubPipeline for RecordingMount {
    fn call(&self, request: Delegation) -> BoxFuture<'_, Result<Response, AppError>> {
        Box::pin(async move {
            let echo = json!({
                "method": request.method.as_str(),
                "path": request.path,
                "query": request.query,
                "body": request.body,
                "payload": request.payload.as_ref().map(|raw| String::from_utf8_lossy(raw).into_owned()),
            });
            self.seen.lock().unwrap().push(request);
            Ok((StatusCode::OK, Json(echo)).into_response())
        })
    }
}

/// Server wired with a recording mount for each default prefix and a manual clock.
pub struct Harness {
    pub server: HttpServer,
    pub user: Arc<RecordingMount>,
    pub stand: Arc<RecordingMount>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: AppConfig) -> Self {
        let user = Arc::new(RecordingMount::default());
        let stand = Arc::new(RecordingMount::default());
        let clock = Arc::new(ManualClock::new());
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let services = Services {
            mounts: vec![
                Mount::new("user", "/api/v1/user", user.clone()),
                Mount::new("stand", "/api/v1/stand", stand.clone()),
            ],
            views: Arc::new(TemplateDir::builtin()),
            rate_limit_store: Arc::new(MemoryStore::new()),
            clock: clock_dyn,
        };
        Self {
            server: HttpServer::with_services(config, services),
            user,
            stand,
            clock,
        }
    }

    pub fn router(&self) -> Router {
        self.server.router()
    }
}

/// Read a whole response body as JSON.
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Start a backend on an ephemeral port that echoes method, path, query,
/// content type and body (parsed when JSON, raw text otherwise).
pub async fn start_echo_backend() -> SocketAddr {
    let app = Router::new().fallback(|request: Request<Body>| async move {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or("").to_string();
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap_or_default();
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Json(json!({
            "method": method,
            "path": path,
            "query": query,
            "content_type": content_type,
            "body": body,
            "raw": String::from_utf8_lossy(&bytes),
        }))
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Run the full server on an ephemeral port.
pub async fn spawn_server(config: AppConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });
    (addr, shutdown)
}
