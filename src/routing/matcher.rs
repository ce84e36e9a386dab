//! Route matching logic.
//!
//! # Responsibilities
//! - Match exact paths (optionally restricted to methods)
//! - Match mounted path prefixes on segment boundaries
//!
//! # Design Decisions
//! - Exact paths are case-sensitive; prefixes ignore ASCII case, so
//!   `/API/v1/user` reaches the `/api/v1/user` mount
//! - `/api` matches `/api` and `/api/...` but not `/apis`
//! - No regex to guarantee O(n) matching

use axum::http::Method;

use crate::pipeline::RequestContext;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, ctx: &RequestContext) -> bool;
}

/// Matches one exact path for a set of methods.
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    path: String,
    methods: Vec<Method>,
}

impl ExactMatcher {
    pub fn new(path: impl Into<String>, methods: Vec<Method>) -> Self {
        Self {
            path: path.into(),
            methods,
        }
    }
}

impl Matcher for ExactMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        ctx.path == self.path && self.methods.contains(&ctx.method)
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. A trailing slash is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }

    /// Remainder of `path` after the prefix, always starting with `/`.
    /// `None` when the prefix does not match.
    pub fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        let head = path.get(..self.prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) {
            return None;
        }
        let rest = &path[self.prefix.len()..];
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, ctx: &RequestContext) -> bool {
        self.strip(&ctx.path).is_some()
    }
}
