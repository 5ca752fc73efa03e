//! The two halves of the response cache: [`CacheLayer::fetch`] before the
//! application runs and [`CacheLayer::update`] after it.
//!
//! ```text
//! request ─▶ fetch ─┬─ NotModified(304) ──────────────────────▶ client
//!                   ├─ Hit(stored response) ──────────────────▶ client
//!                   └─ PassThrough ─▶ handler ─▶ update ─▶ client
//! ```
//!
//! Both halves derive the key the same way, from the same resolved
//! strategy, so a response stored by `update` is what a later equivalent
//! request finds in `fetch`. Every failure degrades to "caching disabled"
//! for that request: nothing here can fail a client response.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::conditional::{Outcome, RequestValidators, evaluate};
use super::config::CacheConfig;
use super::control::{forbids_storage, patch_response_headers, ttl_for};
use super::error::{CacheError, KeyDerivationError};
use super::key::{CacheKey, KeyDeriver};
use super::store::{CacheEntry, CacheStore};
use super::vary::VaryRegistry;
use crate::http::{Method, Request, Response, StatusCode};

/// Headers carried from the stored entry onto a `304 Not Modified`.
const NOT_MODIFIED_HEADERS: [&str; 6] = [
    "ETag",
    "Last-Modified",
    "Cache-Control",
    "Vary",
    "Expires",
    "Content-Location",
];

/// Result of the pre-handler stage.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The client's copy is current: a bodiless `304`.
    NotModified(Response),
    /// A stored response to replay as-is.
    Hit(Response),
    /// No usable entry; run the application handler.
    PassThrough,
}

impl FetchOutcome {
    /// The short-circuit response, or `None` for [`PassThrough`](Self::PassThrough).
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::NotModified(response) | Self::Hit(response) => Some(response),
            Self::PassThrough => None,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

/// Response cache bound to a store, a frozen strategy registry, and config.
///
/// Holds no per-request state and is shared behind an [`Arc`] across
/// concurrent requests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use vcache::cache::{CacheConfig, CacheLayer, MemoryStore, VaryRegistry};
/// use vcache::http::{Method, Request, Response, StatusCode};
///
/// # #[tokio::main] async fn main() {
/// let layer = CacheLayer::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(VaryRegistry::default()),
///     CacheConfig::default(),
/// );
///
/// let request = Request::new(Method::Get, "/hello");
/// assert!(layer.fetch(&request).await.is_pass_through());
///
/// let response = Response::new(StatusCode::Ok).body("hi");
/// layer.update(&request, response).await;
///
/// let replay = layer.fetch(&request).await.into_response().unwrap();
/// assert_eq!(replay.payload().as_ref(), b"hi");
/// # }
/// ```
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    registry: Arc<VaryRegistry>,
    deriver: KeyDeriver,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        registry: Arc<VaryRegistry>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            registry,
            deriver: KeyDeriver::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &VaryRegistry {
        &self.registry
    }

    /// Derives the key for `request` using its route's strategy.
    pub fn derive_key(&self, request: &Request) -> Result<CacheKey, KeyDerivationError> {
        let (route, strategy) = self.registry.resolve(request);
        self.deriver.derive(request, strategy, route)
    }

    /// Pre-handler stage: look for a stored response.
    ///
    /// Only `GET` and `HEAD` are looked up. Key-derivation failures, store
    /// errors, misses, and expired entries all yield
    /// [`FetchOutcome::PassThrough`]. Never writes to the store.
    pub async fn fetch(&self, request: &Request) -> FetchOutcome {
        if !request.method().is_cacheable() {
            return FetchOutcome::PassThrough;
        }

        let key = match self.derive_key(request) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %request.path(), error = %err, "cache key derivation failed; bypassing cache");
                return FetchOutcome::PassThrough;
            }
        };

        let entry = match self.store.get(key.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return FetchOutcome::PassThrough;
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed; treating as miss");
                return FetchOutcome::PassThrough;
            }
        };

        if entry.is_expired_at(Utc::now()) {
            debug!(key = %key, "cache entry expired");
            return FetchOutcome::PassThrough;
        }

        let validators = RequestValidators::from_headers(request.headers());
        match evaluate(&validators, &entry.validators()) {
            Outcome::NotModified => {
                debug!(key = %key, "cache hit; not modified");
                FetchOutcome::NotModified(not_modified(&entry))
            }
            Outcome::Modified => {
                debug!(key = %key, status = entry.status.as_u16(), "cache hit; replaying");
                let mut response = entry.to_response();
                if *request.method() == Method::Head {
                    response.strip_body();
                }
                if let Some(marker) = &self.config.hit_header {
                    response.headers_mut().set(marker.as_str(), "true");
                }
                FetchOutcome::Hit(response)
            }
        }
    }

    /// Post-handler stage: store `response` if eligible, then return it.
    ///
    /// Call only after [`fetch`](Self::fetch) returned
    /// [`FetchOutcome::PassThrough`]. Eligible means: `GET`/`HEAD`, a
    /// configured cacheable status, no [`Response::never_store`] marker,
    /// no `Cache-Control` opt-out (`no-store`, `private`, `max-age=0`), and
    /// a `Vary` header naming only headers the key already folds in. A
    /// response varying on `*` or on an unkeyed header is never stored.
    ///
    /// With `patch_headers` on, the stored and returned response gain the
    /// freshness headers they lacked. Store failures are logged; the
    /// response is returned either way.
    pub async fn update(&self, request: &Request, mut response: Response) -> Response {
        if !self.is_storable(request, &response) {
            return response;
        }
        if let Some(name) = self.unkeyed_vary(&response) {
            debug!(path = %request.path(), vary = name, "response varies on an unkeyed header; not storing");
            return response;
        }

        let key = match self.derive_key(request) {
            Ok(key) => key,
            Err(err) => {
                warn!(path = %request.path(), error = %err, "cache key derivation failed; not storing");
                return response;
            }
        };

        // An empty ETag is not a validator; do not replay it.
        if response.headers().contains("etag") && response.etag().is_none() {
            response.headers_mut().remove("etag");
        }

        let ttl = ttl_for(response.headers(), self.config.default_ttl());
        if ttl.is_zero() {
            return response;
        }

        let now = Utc::now();
        if self.config.patch_headers {
            patch_response_headers(&mut response, ttl, now, self.config.use_etags);
        }

        let entry = CacheEntry::from_response(key.as_str(), &response, now, ttl);
        match self.store.set(key.as_str(), entry, ttl).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "response stored"),
            Err(err) => warn!(key = %key, error = %err, "cache write failed; response not stored"),
        }
        response
    }

    /// Deletes the entry `request` would hit. Returns `true` if one existed.
    ///
    /// Non-cacheable methods are looked up as `GET`, so a `PURGE /page`
    /// removes the `GET /page` entry.
    pub async fn invalidate(&self, request: &Request) -> Result<bool, CacheError> {
        let key = if request.method().is_cacheable() {
            self.derive_key(request)?
        } else {
            self.derive_key(&request.clone().with_method(Method::Get))?
        };
        let removed = self.store.delete(key.as_str()).await?;
        debug!(key = %key, removed, "cache entry invalidated");
        Ok(removed)
    }

    fn is_storable(&self, request: &Request, response: &Response) -> bool {
        request.method().is_cacheable()
            && self.config.is_cacheable_status(response.status().as_u16())
            && !response.is_store_bypassed()
            && !forbids_storage(response.headers())
    }

    fn unkeyed_vary<'a>(&self, response: &'a Response) -> Option<&'a str> {
        response
            .headers()
            .get_list("vary")
            .into_iter()
            .find(|name| *name == "*" || !self.deriver.varies_on(name))
    }
}

fn not_modified(entry: &CacheEntry) -> Response {
    let mut response = Response::new(StatusCode::NotModified);
    for name in NOT_MODIFIED_HEADERS {
        for value in entry.headers.get_all(name) {
            response.add_header(name, value);
        }
    }
    response
}
