//! Static file serving.
//!
//! Requests for files under the public directory are answered verbatim,
//! ahead of every other stage. Misses fall through to the rest of the chain.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::path::{Path, PathBuf};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::pipeline::{AppError, Flow, RequestContext, Stage, StageFuture};

/// Static asset stage.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    dir: ServeDir,
}

impl StaticFiles {
    /// `None` when `root` is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Option<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return None;
        }
        Some(Self {
            root: root.to_path_buf(),
            dir: ServeDir::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Stage for StaticFiles {
    fn name(&self) -> &'static str {
        "static_files"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if ctx.method != Method::GET && ctx.method != Method::HEAD {
                return Ok(Flow::Continue);
            }

            let mut request = Request::builder()
                .method(ctx.method.clone())
                .uri(ctx.original_url.as_str())
                .body(Body::empty())
                .map_err(AppError::internal)?;
            *request.headers_mut() = ctx.headers.clone();

            let response = match self.dir.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            match response.status() {
                StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Ok(Flow::Continue),
                _ => Ok(Flow::Complete(response.map(Body::new))),
            }
        })
    }
}
