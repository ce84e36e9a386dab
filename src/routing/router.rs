//! Request dispatch.
//!
//! # Responsibilities
//! - Render the root view for `GET /`
//! - Hand mounted prefixes to their sub-pipelines
//! - Turn anything left over into a not-found error
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Mounts are checked in configuration order, first match wins
//! - Explicit not-found stage rather than a silent default

use axum::http::Method;
use axum::response::{Html, IntoResponse};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::pipeline::{AppError, Flow, RequestContext, Stage, StageFuture};
use crate::routing::matcher::{ExactMatcher, Matcher};
use crate::routing::mount::Mount;
use crate::routing::view::ViewRenderer;

/// The root page.
#[derive(Clone)]
pub struct RootView {
    matcher: ExactMatcher,
    view: String,
    locals: Map<String, Value>,
}

impl RootView {
    pub fn new(view: impl Into<String>, title: impl Into<String>) -> Self {
        let mut locals = Map::new();
        locals.insert("title".to_string(), Value::String(title.into()));
        Self {
            matcher: ExactMatcher::new("/", vec![Method::GET, Method::HEAD]),
            view: view.into(),
            locals,
        }
    }
}

/// Terminal routing stage: root view, then mounts.
#[derive(Clone)]
pub struct Dispatcher {
    root: RootView,
    views: Arc<dyn ViewRenderer>,
    mounts: Vec<Mount>,
}

impl Dispatcher {
    pub fn new(root: RootView, views: Arc<dyn ViewRenderer>, mounts: Vec<Mount>) -> Self {
        Self { root, views, mounts }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    fn mount_for(&self, ctx: &RequestContext) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.matches(ctx))
    }
}

impl Stage for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if self.root.matcher.matches(ctx) {
                let html = self
                    .views
                    .render(&self.root.view, &self.root.locals)
                    .map_err(AppError::internal)?;
                return Ok(Flow::Complete(Html(html).into_response()));
            }

            if let Some(mount) = self.mount_for(ctx) {
                let response = mount.dispatch(ctx).await?;
                return Ok(Flow::Complete(response));
            }

            Ok(Flow::Continue)
        })
    }
}

/// Rejects every request that reaches it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundFallback;

impl Stage for NotFoundFallback {
    fn name(&self) -> &'static str {
        "not_found"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move { Err(AppError::not_found(ctx.original_url.clone())) })
    }
}
