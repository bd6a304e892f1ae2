//! Runtime-mutable routing index.
//!
//! Patterns have the form `"<METHOD> <path>"`. A path segment written as
//! `{name}` is a placeholder that matches any single segment and binds it to
//! `name`. Patterns without placeholders are static and resolved by exact key
//! lookup; the rest are dynamic and scanned in registration order after the
//! static lookup misses.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{extract::Request, response::Response};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use utoipa::ToSchema;

pub type PathParams = HashMap<String, String>;

pub type BoxedHandler = Arc<dyn Fn(RouteContext, Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Everything a route handler gets besides the request itself.
#[derive(Clone)]
pub struct RouteContext {
    pub params: PathParams,
    pub routes: RouteTable,
}

impl RouteContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Wraps an async function into a [`BoxedHandler`].
pub fn handler<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(RouteContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx, request| f(ctx, request).boxed())
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed route pattern {pattern:?}: {reason}")]
    MalformedPattern { pattern: String, reason: &'static str },

    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },
}

/// Outcome of a successful [`RouteTable::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Static,
    /// A static route with the same key existed and was overwritten.
    StaticReplaced,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Pattern {
    method: String,
    path: String,
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, RouteError> {
        let malformed = |reason| RouteError::MalformedPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let mut parts = pattern.split(' ');
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Err(malformed("expected \"<METHOD> <path>\""));
        };
        if parts.next().is_some() {
            return Err(malformed("too many separators"));
        }
        if method.is_empty() {
            return Err(malformed("empty method"));
        }
        if path.is_empty() {
            return Err(malformed("empty path"));
        }

        let segments = path
            .split('/')
            .map(|segment| match segment.strip_prefix('{') {
                Some(rest) => match rest.strip_suffix('}') {
                    Some("") => Err(malformed("empty placeholder name")),
                    Some(name) => Ok(Segment::Param(name.to_string())),
                    None => Err(malformed("unterminated placeholder")),
                },
                None => Ok(Segment::Literal(segment.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            segments,
        })
    }

    fn is_dynamic(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(_)))
    }

    fn key(&self) -> String {
        route_key(&self.method, &self.path)
    }

    fn matches(&self, method: &str, path: &str) -> Option<PathParams> {
        if self.method != method {
            return None;
        }
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

#[derive(Clone)]
struct Route {
    pattern: Pattern,
    handler: BoxedHandler,
}

#[derive(Default)]
struct RouteIndex {
    static_routes: HashMap<String, Route>,
    dynamic_routes: Vec<Route>,
}

/// A route picked by [`RouteTable::resolve`].
#[derive(Clone)]
pub struct Resolved {
    /// The pattern the route was registered with.
    pub pattern: String,
    pub handler: BoxedHandler,
    pub params: PathParams,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RouteCounts {
    pub static_routes: usize,
    pub dynamic_routes: usize,
}

/// Shared handle to the routing index. Cloning is cheap and every clone sees
/// the same routes.
#[derive(Clone, Default)]
pub struct RouteTable {
    inner: Arc<RwLock<RouteIndex>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a pattern without registering it.
    pub fn validate_pattern(pattern: &str) -> Result<(), RouteError> {
        Pattern::parse(pattern).map(|_| ())
    }

    /// Adds a route. The pattern is parsed before the write lock is taken so
    /// a malformed pattern never blocks readers.
    pub async fn register(
        &self,
        pattern: &str,
        handler: BoxedHandler,
    ) -> Result<Registration, RouteError> {
        let pattern = Pattern::parse(pattern)?;
        let route = Route { pattern, handler };

        let mut index = self.inner.write().await;
        if route.pattern.is_dynamic() {
            index.dynamic_routes.push(route);
            return Ok(Registration::Dynamic);
        }

        let key = route.pattern.key();
        Ok(match index.static_routes.insert(key, route) {
            Some(_) => Registration::StaticReplaced,
            None => Registration::Static,
        })
    }

    pub async fn resolve(&self, method: &str, path: &str) -> Result<Resolved, RouteError> {
        let index = self.inner.read().await;

        if let Some(route) = index.static_routes.get(&route_key(method, path)) {
            return Ok(Resolved {
                pattern: route.pattern.key(),
                handler: route.handler.clone(),
                params: PathParams::new(),
            });
        }

        index
            .dynamic_routes
            .iter()
            .find_map(|route| {
                route.pattern.matches(method, path).map(|params| Resolved {
                    pattern: route.pattern.key(),
                    handler: route.handler.clone(),
                    params,
                })
            })
            .ok_or_else(|| RouteError::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    /// Resolves the request and runs the matched handler. The read lock is
    /// released before the handler is polled.
    pub async fn dispatch(&self, request: Request) -> Result<Response, RouteError> {
        let resolved = self
            .resolve(request.method().as_str(), request.uri().path())
            .await?;

        tracing::trace!(route = %resolved.pattern, "Dispatching request");
        let ctx = RouteContext {
            params: resolved.params,
            routes: self.clone(),
        };
        Ok((resolved.handler)(ctx, request).await)
    }

    pub async fn counts(&self) -> RouteCounts {
        let index = self.inner.read().await;
        RouteCounts {
            static_routes: index.static_routes.len(),
            dynamic_routes: index.dynamic_routes.len(),
        }
    }
}
