//! Method + path routing with an optional response cache in front of the
//! handlers.
//!
//! | Pattern       | Matches                  | Params                          |
//! |---------------|--------------------------|---------------------------------|
//! | `/about`      | `/about`                 | *(none)*                        |
//! | `/users/:id`  | `/users/42`              | `id → "42"`                     |
//! | `/files/*`    | `/files/docs/readme.txt` | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are ignored on patterns and paths. Routes are tried in
//! registration order. A `HEAD` request falls back to the `GET` route for the
//! same path when no `HEAD` route is registered.
//!
//! The matched pattern string becomes the request's route identifier, which
//! is what a [`VaryRegistry`](crate::cache::VaryRegistry) is keyed by:
//!
//! ```
//! use std::sync::Arc;
//! use vcache::cache::{CacheConfig, CacheLayer, MemoryStore, VaryRegistry, VaryStrategy};
//! use vcache::context::Context;
//! use vcache::{Method, Request, Response, Router, StatusCode};
//!
//! # #[tokio::main] async fn main() {
//! let registry = VaryRegistry::builder()
//!     .register("/users/:id", VaryStrategy::on_cookie_presence("sessionid"))
//!     .build();
//! let layer = CacheLayer::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(registry),
//!     CacheConfig::default(),
//! );
//!
//! let mut router = Router::with_cache(Arc::new(layer));
//! router.get("/users/:id", |ctx: Context| async move {
//!     let id = ctx.params().get("id").unwrap_or_default().to_owned();
//!     Response::new(StatusCode::Ok).body(id)
//! });
//!
//! let response = router.route(Request::new(Method::Get, "/users/7")).await;
//! assert_eq!(response.payload().as_ref(), b"7");
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::cache::CacheLayer;
use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async route handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Any `Fn(Context) -> impl Future<Output = Response>` usable as a handler.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Static(String),
    Parameter(String),
}

/// Compiled route pattern. Shared with the vary registry so strategies can
/// be resolved from a bare path before routing.
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// `/x/*` compiles to a prefix match, anything with `:` to segment
    /// captures, the rest to an exact match.
    pub(crate) fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    pub(crate) fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != parts.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (segment, part) in segments.iter().zip(parts) {
                    match segment {
                        Segment::Static(s) if s != part => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.clone(), part.to_string()),
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    // Pattern as registered; doubles as the request's route identifier.
    source: String,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// Dispatches requests to handlers, optionally through a [`CacheLayer`].
///
/// Unmatched requests get `404 Not Found` and never touch the cache.
pub struct Router {
    routes: Vec<Route>,
    cache: Option<Arc<CacheLayer>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            cache: None,
        }
    }

    /// A router whose matched `GET`/`HEAD` requests go through `cache`.
    pub fn with_cache(cache: Arc<CacheLayer>) -> Self {
        Self {
            routes: Vec::new(),
            cache: Some(cache),
        }
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    pub fn head(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Head, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Post, path, handler);
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Put, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Delete, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Patch, path, handler);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            source: path.to_string(),
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn find(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        let exact = self
            .routes
            .iter()
            .find_map(|route| route.matches(method, path).map(|params| (route, params)));
        if exact.is_some() || *method != Method::Head {
            return exact;
        }
        self.routes
            .iter()
            .find_map(|route| route.matches(&Method::Get, path).map(|params| (route, params)))
    }

    /// Dispatches `request` to the first matching route.
    ///
    /// With a cache attached, a matched `GET`/`HEAD` request is first offered
    /// to [`CacheLayer::fetch`]; the handler only runs on a pass-through, and
    /// its response goes through [`CacheLayer::update`].
    pub async fn route(&self, mut request: Request) -> Response {
        let Some((route, params)) = self.find(request.method(), request.path()) else {
            trace!(method = %request.method(), path = %request.path(), "no route matched");
            return Response::new(StatusCode::NotFound);
        };
        request.set_route(route.source.as_str());

        let cache = match &self.cache {
            Some(cache) if request.method().is_cacheable() => cache,
            _ => return (route.handler)(Context::with_params(request, params)).await,
        };

        if let Some(response) = cache.fetch(&request).await.into_response() {
            return response;
        }
        let snapshot = request.clone();
        let response = (route.handler)(Context::with_params(request, params)).await;
        // Store the full response so HEAD and GET derive the same ETag.
        let mut response = cache.update(&snapshot, response).await;
        if *snapshot.method() == Method::Head {
            response.strip_body();
        }
        response
    }
}
