//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → stage 1 .. stage N  (on_request, in order)
//!         Continue        → next stage
//!         Complete(resp)  → stop, resp is the answer
//!         Err(AppError)   → stop, terminal error handler renders it
//!     → entered stages      (on_response, reverse order)
//!     → Response
//! ```
//!
//! # Design Decisions
//! - The chain is data: an ordered list of boxed stages built once at startup
//! - Errors are values; the runner alone routes them to the terminal handler
//! - A forward pass that nobody completes is treated as unmatched (404)
//! - A forward pass that outlives the deadline fails with 408; the stages it
//!   entered still see the error response

pub mod context;
pub mod error;
pub mod stage;

pub use context::RequestContext;
pub use error::AppError;
pub use stage::{Flow, Stage, StageFuture};

use axum::response::Response;
use std::sync::Arc;
use std::time::Duration;

use crate::http::response::error_response;

/// Ordered chain of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            timeout: None,
        }
    }

    /// Bound the forward pass of every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a stage only when `enabled`.
    pub fn stage_if(self, enabled: bool, stage: impl Stage + 'static) -> Self {
        if enabled {
            self.stage(stage)
        } else {
            self
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Drive one request through the chain. Always produces a response.
    pub async fn run(&self, mut ctx: RequestContext) -> Response {
        let mut entered = 0;
        let forward = self.forward(&mut ctx, &mut entered);
        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, forward).await.ok(),
            None => Some(forward.await),
        };

        let outcome = match finished {
            Some(Some(outcome)) => outcome,
            Some(None) => Err(AppError::not_found(ctx.original_url.clone())),
            None => {
                tracing::warn!(
                    url = %ctx.original_url,
                    stage = self.stages.get(entered.saturating_sub(1)).map(|s| s.name()),
                    "Request deadline exceeded"
                );
                Err(AppError::Timeout)
            }
        };
        let mut response = match outcome {
            Ok(response) => response,
            Err(err) => error_response(&ctx, err),
        };

        for stage in self.stages[..entered].iter().rev() {
            response = stage.on_response(&ctx, response).await;
        }
        response
    }

    /// Run `on_request` in order until a stage completes or fails.
    /// `entered` counts the stages whose hook was started.
    async fn forward(&self, ctx: &mut RequestContext, entered: &mut usize) -> Option<Result<Response, AppError>> {
        for stage in &self.stages {
            *entered += 1;
            match stage.on_request(ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Complete(response)) => return Some(Ok(response)),
                Err(err) => {
                    tracing::debug!(
                        stage = stage.name(),
                        kind = err.kind(),
                        url = %ctx.original_url,
                        "Stage failed"
                    );
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::forwarded::ProxyTrust;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use axum::response::IntoResponse;
    use futures_util::future::BoxFuture;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records the order in which hooks fire.
    struct Tracer {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        flow: fn() -> Result<Flow, AppError>,
    }

    impl Stage for Tracer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("req:{}", self.name));
                (self.flow)()
            })
        }

        fn on_response<'a>(&'a self, _ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("res:{}", self.name));
                response
                    .headers_mut()
                    .append("x-seen", HeaderValue::from_static(self.name));
                response
            })
        }
    }

    fn tracer(name: &'static str, log: &Arc<Mutex<Vec<String>>>, flow: fn() -> Result<Flow, AppError>) -> Tracer {
        Tracer { name, log: log.clone(), flow }
    }

    fn context(uri: &str) -> RequestContext {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        RequestContext::from_request(req, None, &ProxyTrust::new(false))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_complete_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(tracer("a", &log, || Ok(Flow::Continue)))
            .stage(tracer("b", &log, || Ok(Flow::Complete(StatusCode::OK.into_response()))))
            .stage(tracer("c", &log, || Ok(Flow::Continue)));

        let response = pipeline.run(context("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["req:a", "req:b", "res:b", "res:a"]
        );
    }

    #[tokio::test]
    async fn test_error_skips_remaining_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(tracer("a", &log, || Ok(Flow::Continue)))
            .stage(tracer("b", &log, || Err(AppError::MalformedBody("bad".into()))))
            .stage(tracer("c", &log, || Ok(Flow::Continue)));

        let response = pipeline.run(context("/")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let seen: Vec<_> = response.headers().get_all("x-seen").iter().collect();
        assert_eq!(seen, vec!["b", "a"]);
        assert!(!log.lock().unwrap().iter().any(|e| e.ends_with(":c")));
    }

    #[tokio::test]
    async fn test_unclaimed_request_is_not_found() {
        let counter = Arc::new(AtomicUsize::new(0));
        struct Count(Arc<AtomicUsize>);
        impl Stage for Count {
            fn name(&self) -> &'static str {
                "count"
            }
            fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
                Box::pin(async move {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    Ok(Flow::Continue)
                })
            }
        }

        let pipeline = Pipeline::new().stage(Count(counter.clone()));
        let response = pipeline.run(context("/nowhere?x=1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let body = body_json(response).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "/nowhere?x=1 is not a valid endpoint");
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout_response() {
        struct Stall;
        impl Stage for Stall {
            fn name(&self) -> &'static str {
                "stall"
            }
            fn on_request<'a>(&'a self, _ctx: &'a mut RequestContext) -> StageFuture<'a> {
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Ok(Flow::Continue)
                })
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(tracer("a", &log, || Ok(Flow::Continue)))
            .stage(Stall)
            .stage(tracer("c", &log, || Ok(Flow::Continue)))
            .with_timeout(Duration::from_millis(50));

        let response = pipeline.run(context("/slow")).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.headers()["x-seen"], "a");
        assert_eq!(*log.lock().unwrap(), vec!["req:a", "res:a"]);

        let body = body_json(response).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "Request timed out");
    }

    #[tokio::test]
    async fn test_fast_request_within_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(tracer("a", &log, || Ok(Flow::Complete(StatusCode::OK.into_response()))))
            .with_timeout(Duration::from_secs(5));
        assert_eq!(pipeline.timeout(), Some(Duration::from_secs(5)));

        let response = pipeline.run(context("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_stage_if() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage_if(false, tracer("off", &log, || Ok(Flow::Continue)))
            .stage_if(true, tracer("on", &log, || Ok(Flow::Continue)));
        assert_eq!(pipeline.stage_names(), vec!["on"]);
    }
}
