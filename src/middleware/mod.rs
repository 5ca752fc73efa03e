//! Middleware pipeline and the cache adapters that plug into it.
//!
//! A chain is an ordered `Vec<MiddlewareHandler>`; each layer receives the
//! [`Context`] and a [`Next`] cursor for the rest of the chain. The last
//! layer is normally the application handler wrapped with [`from_handler`].
//!
//! Cache ordering matters: [`StripCookiesMiddleware`] must run before
//! [`CacheMiddleware`] so the key is derived from the filtered `Cookie`
//! header. [`AdminCacheBypassMiddleware`] and [`CacheHeadersMiddleware`]
//! rewrite response headers, so they go after it, where
//! [`CacheLayer::update`] sees their result.
//!
//! ```
//! use std::sync::Arc;
//! use vcache::cache::{CacheConfig, CacheLayer, CookieFilter, MemoryStore, VaryRegistry};
//! use vcache::context::Context;
//! use vcache::middleware::{
//!     CacheMiddleware, Next, StripCookiesMiddleware, from_handler, from_middleware,
//! };
//! use vcache::{Method, Request, Response, StatusCode};
//!
//! # #[tokio::main] async fn main() {
//! let layer = Arc::new(CacheLayer::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(VaryRegistry::default()),
//!     CacheConfig::default(),
//! ));
//!
//! let chain = vec![
//!     from_middleware(Arc::new(StripCookiesMiddleware::new(CookieFilter::strip(["_ga"])))),
//!     from_middleware(Arc::new(CacheMiddleware::new(layer))),
//!     from_handler(|_ctx: Context| async { Response::new(StatusCode::Ok).body("hello") }),
//! ];
//!
//! let request = Request::new(Method::Get, "/").header("Cookie", "_ga=GA1.2.3");
//! let response = Next::new(chain).run(Context::new(request)).await;
//! assert_eq!(response.payload().as_ref(), b"hello");
//! # }
//! ```

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::Utc;

use crate::cache::control::{add_never_cache_headers, max_age, patch_response_headers};
use crate::cache::{CacheConfig, CacheLayer, CookieFilter};
use crate::router::IntoHandler;
use crate::{Method, Request, Response, StatusCode, context::Context};

/// Cursor into the remaining middleware chain for one request.
///
/// Consumed by [`run`](Self::run), so each layer can forward at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

/// Type-erased, cheaply-cloneable middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Wraps a [`Middleware`] implementation as a chain entry.
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps an application handler as the terminal chain entry. The rest of the
/// chain, if any, is ignored.
pub fn from_handler(handler: impl IntoHandler) -> MiddlewareHandler {
    Arc::new(move |ctx: Context, _next: Next| handler.call(ctx))
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next layer. An exhausted chain yields a
    /// `500 Internal Server Error`.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// A layer in the pipeline.
///
/// Implementations may pass through (`next.run(ctx).await`), short-circuit
/// by returning a response without calling `next`, or decorate the
/// downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Runs [`CacheLayer::fetch`] before the rest of the chain and
/// [`CacheLayer::update`] after it.
///
/// A hit or `304` short-circuits; downstream layers and the handler are
/// skipped. Non-`GET`/`HEAD` requests pass straight through.
pub struct CacheMiddleware {
    layer: Arc<CacheLayer>,
}

impl CacheMiddleware {
    pub fn new(layer: Arc<CacheLayer>) -> Self {
        Self { layer }
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let layer = self.layer.clone();
        Box::pin(async move {
            if !ctx.request().method().is_cacheable() {
                return next.run(ctx).await;
            }

            if let Some(response) = layer.fetch(ctx.request()).await.into_response() {
                return response;
            }

            // The request moves into the chain; keep a copy to key the store.
            let snapshot = ctx.request().clone();
            let response = next.run(ctx).await;
            layer.update(&snapshot, response).await
        })
    }
}

/// Rewrites the request's `Cookie` header through a [`CookieFilter`] before
/// forwarding it.
pub struct StripCookiesMiddleware {
    filter: CookieFilter,
}

impl StripCookiesMiddleware {
    pub fn new(filter: CookieFilter) -> Self {
        Self { filter }
    }

    /// The middleware for the configured cookie lists, or `None` when both
    /// are empty.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        CookieFilter::from_config(config).map(Self::new)
    }
}

impl Middleware for StripCookiesMiddleware {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        self.filter.apply(ctx.request_mut().headers_mut());
        Box::pin(next.run(ctx))
    }
}

/// Marks responses under a path prefix (`/admin/` by default) as never
/// cacheable unless the handler chose a `max-age` itself.
pub struct AdminCacheBypassMiddleware {
    prefix: String,
}

impl AdminCacheBypassMiddleware {
    pub fn new() -> Self {
        Self::with_prefix("/admin/")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for AdminCacheBypassMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for AdminCacheBypassMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let bypass = ctx.request().path().starts_with(self.prefix.as_str());
        Box::pin(async move {
            let mut response = next.run(ctx).await;
            if bypass && max_age(response.headers()).is_none() {
                add_never_cache_headers(&mut response, Utc::now());
            }
            response
        })
    }
}

type AuthCheck = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Adds freshness headers to successful `GET` responses.
///
/// Each header is only added if missing; see
/// [`patch_response_headers`]. With [`anonymous_only`](Self::anonymous_only),
/// responses to authenticated requests get never-cache headers instead and
/// are therefore not stored. Register the route with a strategy that
/// separates the same requests, such as
/// [`VaryStrategy::on_header_presence`](crate::cache::VaryStrategy::on_header_presence),
/// so authenticated visitors never read the anonymous entry.
///
/// ```
/// use std::time::Duration;
/// use vcache::middleware::CacheHeadersMiddleware;
///
/// let headers = CacheHeadersMiddleware::new(Duration::from_secs(300))
///     .anonymous_only(|req| req.headers().contains("authorization"));
/// # let _ = headers;
/// ```
pub struct CacheHeadersMiddleware {
    ttl: Duration,
    use_etags: bool,
    is_authenticated: Option<AuthCheck>,
}

impl CacheHeadersMiddleware {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            use_etags: true,
            is_authenticated: None,
        }
    }

    /// TTL and ETag policy taken from `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: config.default_ttl(),
            use_etags: config.use_etags,
            is_authenticated: None,
        }
    }

    /// Sends never-cache headers for requests `is_authenticated` accepts.
    pub fn anonymous_only<F>(mut self, is_authenticated: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.is_authenticated = Some(Arc::new(is_authenticated));
        self
    }
}

impl Middleware for CacheHeadersMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let request = ctx.request();
        let is_get = *request.method() == Method::Get;
        let authenticated = self.is_authenticated.as_ref().is_some_and(|check| check(request));
        let (ttl, use_etags) = (self.ttl, self.use_etags);

        Box::pin(async move {
            let mut response = next.run(ctx).await;
            if !is_get || response.status() != StatusCode::Ok {
                return response;
            }
            if authenticated {
                add_never_cache_headers(&mut response, Utc::now());
            } else {
                patch_response_headers(&mut response, ttl, Utc::now(), use_etags);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::cache::{MemoryStore, VaryRegistry, VaryStrategy};
    use crate::{Method, Request};

    fn cache_layer() -> Arc<CacheLayer> {
        Arc::new(CacheLayer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(VaryRegistry::default()),
            CacheConfig::default(),
        ))
    }

    // Terminal handler that counts calls and echoes the Cookie header it saw.
    fn echo_cookie(calls: Arc<AtomicUsize>) -> MiddlewareHandler {
        from_handler(move |ctx: Context| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let cookie = ctx.request().headers().get("cookie").unwrap_or("").to_owned();
                Response::new(StatusCode::Ok).body(cookie)
            }
        })
    }

    #[tokio::test]
    async fn empty_chain_returns_500() {
        let res = Next::new(vec![])
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn layers_run_in_order() {
        struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

        impl Middleware for Tag {
            fn handle(
                &self,
                ctx: Context,
                next: Next,
            ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
                self.1.lock().unwrap().push(self.0);
                Box::pin(next.run(ctx))
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            from_middleware(Arc::new(Tag("a", seen.clone()))),
            from_middleware(Arc::new(Tag("b", seen.clone()))),
            from_handler(|_ctx: Context| async { Response::new(StatusCode::Ok) }),
        ];
        let res = Next::new(chain)
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cache_middleware_short_circuits_second_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(CacheMiddleware::new(cache_layer()))),
            echo_cookie(calls.clone()),
        ];

        for _ in 0..3 {
            let req = Request::new(Method::Get, "/page");
            let res = Next::new(chain.clone()).run(Context::new(req)).await;
            assert_eq!(res.status(), StatusCode::Ok);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_middleware_ignores_unsafe_methods() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(CacheMiddleware::new(cache_layer()))),
            echo_cookie(calls.clone()),
        ];
        for _ in 0..2 {
            let req = Request::new(Method::Post, "/page");
            Next::new(chain.clone()).run(Context::new(req)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn strip_cookies_runs_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(StripCookiesMiddleware::new(CookieFilter::allow([
                "sessionid",
            ])))),
            echo_cookie(calls),
        ];
        let req = Request::new(Method::Get, "/").header("Cookie", "_ga=1; sessionid=abc");
        let res = Next::new(chain).run(Context::new(req)).await;
        assert_eq!(res.payload().as_ref(), b"sessionid=abc");
    }

    #[tokio::test]
    async fn stripped_tracking_cookies_share_an_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(StripCookiesMiddleware::new(CookieFilter::strip([
                "_ga",
            ])))),
            from_middleware(Arc::new(CacheMiddleware::new(cache_layer()))),
            echo_cookie(calls.clone()),
        ];

        for visitor in ["_ga=GA1.1", "_ga=GA1.2", "_ga=GA1.3"] {
            let req = Request::new(Method::Get, "/").header("Cookie", visitor);
            Next::new(chain.clone()).run(Context::new(req)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let req = Request::new(Method::Get, "/").header("Cookie", "_ga=GA1.4; theme=dark");
        let res = Next::new(chain.clone()).run(Context::new(req)).await;
        assert_eq!(res.payload().as_ref(), b"theme=dark");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // Terminal handler that counts calls; `/admin/fresh` opts into caching.
    fn pages(calls: Arc<AtomicUsize>) -> MiddlewareHandler {
        from_handler(move |ctx: Context| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let response = Response::new(StatusCode::Ok).body(ctx.request().path().to_owned());
                if ctx.request().path() == "/admin/fresh" {
                    response.header("Cache-Control", "max-age=60")
                } else {
                    response
                }
            }
        })
    }

    #[tokio::test]
    async fn admin_pages_are_never_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(CacheMiddleware::new(cache_layer()))),
            from_middleware(Arc::new(AdminCacheBypassMiddleware::new())),
            pages(calls.clone()),
        ];
        let send = |path: &str| Next::new(chain.clone()).run(Context::new(Request::new(Method::Get, path)));

        let first = send("/admin/users").await;
        send("/admin/users").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(first.headers().get_list("cache-control").contains(&"no-store"));
        assert!(first.headers().contains("expires"));

        // An explicit max-age is respected.
        let fresh = send("/admin/fresh").await;
        send("/admin/fresh").await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(max_age(fresh.headers()), Some(60));

        let public = send("/administrator").await;
        send("/administrator").await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(!public.headers().get_list("cache-control").contains(&"no-store"));
    }

    #[tokio::test]
    async fn admin_prefix_is_configurable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(AdminCacheBypassMiddleware::with_prefix("/staff/"))),
            pages(calls),
        ];
        let res = Next::new(chain.clone())
            .run(Context::new(Request::new(Method::Get, "/staff/report")))
            .await;
        assert_eq!(max_age(res.headers()), Some(0));
        let res = Next::new(chain)
            .run(Context::new(Request::new(Method::Get, "/admin/users")))
            .await;
        assert!(!res.headers().contains("cache-control"));
    }

    #[tokio::test]
    async fn cache_headers_skip_authenticated_requests() {
        let registry = VaryRegistry::builder()
            .register("/account", VaryStrategy::on_header_presence("Authorization"))
            .build();
        let layer = Arc::new(CacheLayer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(registry),
            CacheConfig::default(),
        ));
        let headers = CacheHeadersMiddleware::new(Duration::from_secs(120))
            .anonymous_only(|req| req.headers().contains("authorization"));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(CacheMiddleware::new(layer))),
            from_middleware(Arc::new(headers)),
            pages(calls.clone()),
        ];
        let send = |req: Request| Next::new(chain.clone()).run(Context::new(req));

        let anon = send(Request::new(Method::Get, "/account")).await;
        assert_eq!(max_age(anon.headers()), Some(120));
        assert!(anon.etag().is_some());
        send(Request::new(Method::Get, "/account")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let member = || Request::new(Method::Get, "/account").header("Authorization", "Bearer t");
        let res = send(member()).await;
        assert!(res.headers().get_list("cache-control").contains(&"private"));
        assert!(res.etag().is_none());
        send(member()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cache_headers_only_touch_successful_gets() {
        let chain = vec![
            from_middleware(Arc::new(CacheHeadersMiddleware::from_config(&CacheConfig::default()))),
            from_handler(|ctx: Context| async move {
                if ctx.request().path() == "/missing" {
                    Response::new(StatusCode::NotFound)
                } else {
                    Response::new(StatusCode::Ok)
                }
            }),
        ];
        let send = |method: Method, path: &str| {
            Next::new(chain.clone()).run(Context::new(Request::new(method, path)))
        };

        assert_eq!(max_age(send(Method::Get, "/").await.headers()), Some(600));
        assert!(!send(Method::Post, "/").await.headers().contains("cache-control"));
        assert!(!send(Method::Get, "/missing").await.headers().contains("cache-control"));
    }

    #[test]
    fn strip_cookies_from_config() {
        assert!(StripCookiesMiddleware::from_config(&CacheConfig::default()).is_none());
        let config = CacheConfig {
            allowed_cookie_names: vec!["sessionid".into()],
            ..CacheConfig::default()
        };
        assert!(StripCookiesMiddleware::from_config(&config).is_some());
    }
}
