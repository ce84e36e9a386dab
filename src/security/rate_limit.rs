//! Per-client rate limiting.
//!
//! # Responsibilities
//! - Count requests per client identity under a path prefix
//! - Reject the request once a client exceeds the ceiling in its window
//! - Advertise the remaining quota on responses
//!
//! # Design Decisions
//! - Fixed window: a client's window starts at its first request and resets
//!   once the window length has elapsed
//! - The store is injected, not global; increment-and-check is atomic per key
//! - Time comes from an injected [`Clock`] so windows can be tested

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::pipeline::{AppError, Flow, RequestContext, Stage, StageFuture};
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().expect("manual clock mutex poisoned");
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("manual clock mutex poisoned")
    }
}

/// Usage of one client's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests counted in the window, including the current one.
    pub hits: u32,
    /// When the window ends.
    pub reset_at: Instant,
}

/// Counter storage shared by all requests.
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` and return the resulting usage.
    fn hit(&self, key: &str, now: Instant, window: Duration) -> Quota;

    /// Drop windows that ended before `now`. Returns how many were dropped.
    fn purge_expired(&self, now: Instant, window: Duration) -> usize;

    /// Forget a client.
    fn reset(&self, key: &str);
}

#[derive(Debug, Clone, Copy)]
struct Window {
    hits: u32,
    started: Instant,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, now: Instant, window: Duration) -> Quota {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { hits: 0, started: now });

        if now.saturating_duration_since(entry.started) >= window {
            entry.hits = 0;
            entry.started = now;
        }
        entry.hits = entry.hits.saturating_add(1);

        Quota {
            hits: entry.hits,
            reset_at: window_end(entry.started, window),
        }
    }

    fn purge_expired(&self, now: Instant, window: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
        before.saturating_sub(self.windows.len())
    }

    fn reset(&self, key: &str) {
        self.windows.remove(key);
    }
}

/// `started + window`, clamped to the latest instant the platform can represent.
fn window_end(started: Instant, window: Duration) -> Instant {
    if let Some(end) = started.checked_add(window) {
        return end;
    }
    let mut end = started;
    let mut step = window;
    while !step.is_zero() {
        match end.checked_add(step) {
            Some(next) => end = next,
            None => step /= 2,
        }
    }
    end
}

/// Outcome recorded for `on_response`.
#[derive(Debug, Clone, Copy)]
struct Applied {
    quota: Quota,
    now: Instant,
}

/// Rate limiting stage.
pub struct RateLimiter {
    scope: PathPrefixMatcher,
    max_requests: u32,
    window: Duration,
    message: String,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scope: PathPrefixMatcher::new(&config.path_prefix),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            message: config.message.clone(),
            store,
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if !self.scope.matches(ctx) {
                return Ok(Flow::Continue);
            }

            let key = ctx.client_key();
            let now = self.clock.now();
            let quota = self.store.hit(&key, now, self.window);
            ctx.extensions.insert(Applied { quota, now });

            if quota.hits > self.max_requests {
                tracing::warn!(client = %key, hits = quota.hits, "Rate limit exceeded");
                metrics::record_rate_limited(self.scope.prefix());
                return Err(AppError::RateLimitExceeded {
                    message: self.message.clone(),
                    retry_after: quota.reset_at.saturating_duration_since(now),
                });
            }
            Ok(Flow::Continue)
        })
    }

    fn on_response<'a>(&'a self, ctx: &'a RequestContext, mut response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let Some(applied) = ctx.extensions.get::<Applied>() else {
                return response;
            };

            let remaining = self.max_requests.saturating_sub(applied.quota.hits);
            let reset_secs = ceil_secs(applied.quota.reset_at.saturating_duration_since(applied.now));

            let headers = response.headers_mut();
            headers.insert(HeaderName::from_static(X_RATELIMIT_LIMIT), HeaderValue::from(self.max_requests));
            headers.insert(HeaderName::from_static(X_RATELIMIT_REMAINING), HeaderValue::from(remaining));
            headers.insert(HeaderName::from_static(X_RATELIMIT_RESET), HeaderValue::from(reset_secs));
            if response.status() == StatusCode::TOO_MANY_REQUESTS && applied.quota.hits > self.max_requests {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(reset_secs));
            }
            response
        })
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Periodically drop expired windows until `shutdown` fires.
pub async fn run_janitor(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(window);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = store.purge_expired(clock.now(), window);
                tracing::debug!(purged, "Rate limit windows purged");
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::forwarded::ProxyTrust;
    use axum::body::Body;
    use axum::http::Request;

    const HOUR: Duration = Duration::from_secs(3600);

    fn limiter(max: u32, clock: Arc<ManualClock>) -> RateLimiter {
        let config = RateLimitConfig {
            max_requests: max,
            ..RateLimitConfig::default()
        };
        RateLimiter::new(&config, Arc::new(MemoryStore::new()), clock)
    }

    fn context(path: &str, ip: &str) -> RequestContext {
        let req = Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap();
        RequestContext::from_request(req, None, &ProxyTrust::new(true))
    }

    #[test]
    fn test_fixed_window_resets() {
        let store = MemoryStore::new();
        let t0 = Instant::now();

        assert_eq!(store.hit("a", t0, HOUR).hits, 1);
        assert_eq!(store.hit("a", t0 + Duration::from_secs(10), HOUR).hits, 2);

        let q = store.hit("a", t0 + HOUR, HOUR);
        assert_eq!(q.hits, 1);
        assert_eq!(q.reset_at, t0 + HOUR + HOUR);
    }

    #[test]
    fn test_huge_window_saturates() {
        let store = MemoryStore::new();
        let t0 = Instant::now();

        let q = store.hit("a", t0, Duration::MAX);
        assert_eq!(q.hits, 1);
        assert!(q.reset_at > t0);
        assert_eq!(store.hit("a", t0 + HOUR, Duration::MAX).hits, 2);
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryStore::new();
        let t0 = Instant::now();
        store.hit("old", t0, HOUR);
        store.hit("new", t0 + Duration::from_secs(1800), HOUR);

        assert_eq!(store.purge_expired(t0 + HOUR, HOUR), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.hit("same", now, HOUR);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.hit("same", now, HOUR).hits, 2001);
    }

    #[tokio::test]
    async fn test_rejects_after_ceiling() {
        let clock = Arc::new(ManualClock::new());
        let limiter = limiter(3, clock.clone());

        for _ in 0..3 {
            let mut ctx = context("/api/v1/stand", "1.1.1.1");
            assert!(matches!(limiter.on_request(&mut ctx).await, Ok(Flow::Continue)));
        }

        let mut ctx = context("/api/v1/stand", "1.1.1.1");
        match limiter.on_request(&mut ctx).await {
            Err(AppError::RateLimitExceeded { retry_after, message }) => {
                assert_eq!(retry_after, HOUR);
                assert!(message.contains("try again in an hour"));
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }

        // Another client is unaffected.
        let mut ctx = context("/api/v1/stand", "2.2.2.2");
        assert!(matches!(limiter.on_request(&mut ctx).await, Ok(Flow::Continue)));

        clock.advance(HOUR);
        let mut ctx = context("/api/v1/stand", "1.1.1.1");
        assert!(matches!(limiter.on_request(&mut ctx).await, Ok(Flow::Continue)));
    }

    #[tokio::test]
    async fn test_out_of_scope_paths_are_not_counted() {
        let limiter = limiter(1, Arc::new(ManualClock::new()));
        for _ in 0..5 {
            let mut ctx = context("/apis", "1.1.1.1");
            assert!(matches!(limiter.on_request(&mut ctx).await, Ok(Flow::Continue)));
            assert!(ctx.extensions.get::<Applied>().is_none());
        }
    }

    #[tokio::test]
    async fn test_quota_headers() {
        let limiter = limiter(10, Arc::new(ManualClock::new()));
        let mut ctx = context("/api", "1.1.1.1");
        limiter.on_request(&mut ctx).await.unwrap();

        let response = limiter.on_response(&ctx, Response::new(Body::empty())).await;
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "10");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "9");
        assert_eq!(response.headers()[X_RATELIMIT_RESET], "3600");
        assert!(response.headers().get("retry-after").is_none());
    }
}
