//! Cache key derivation.
//!
//! A key is a pure function of the request method, URL, and the vary
//! material selected by the route's [`VaryStrategy`]:
//!
//! ```text
//! vcache.response.<prefix>.<METHOD>.<sha256(url)>.<sha256(vary material)>
//! ```
//!
//! The URL digest covers the path verbatim plus the query string with its
//! `&`-separated pairs sorted, so reordered parameters share an entry. The
//! `Host` header is prepended when configured. Digests keep distinct paths
//! in distinct key spaces regardless of their length or characters.

use std::fmt;

use sha2::{Digest, Sha256};

use super::config::CacheConfig;
use super::error::KeyDerivationError;
use super::vary::VaryStrategy;
use crate::http::Request;

/// Route label used in errors and logs when no route was resolved.
pub const DEFAULT_ROUTE: &str = "<default>";

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys. Holds only configuration; no per-request state.
///
/// # Examples
///
/// ```
/// use vcache::cache::{CacheConfig, KeyDeriver, VaryStrategy};
/// use vcache::http::{Method, Request};
///
/// let deriver = KeyDeriver::new(&CacheConfig::default());
/// let strategy = VaryStrategy::UseRequestHeaders;
///
/// let a = Request::new(Method::Get, "/list?b=2&a=1");
/// let b = Request::new(Method::Get, "/list?a=1&b=2");
/// assert_eq!(
///     deriver.derive(&a, &strategy, None).unwrap(),
///     deriver.derive(&b, &strategy, None).unwrap(),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    prefix: String,
    include_host: bool,
    // Lowercased, sorted, deduplicated.
    vary_headers: Vec<String>,
}

impl KeyDeriver {
    pub fn new(config: &CacheConfig) -> Self {
        let mut vary_headers: Vec<String> = config
            .vary_headers
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        vary_headers.sort();
        vary_headers.dedup();

        Self {
            prefix: config.key_prefix.clone(),
            include_host: config.include_host,
            vary_headers,
        }
    }

    /// Whether request header `name` is folded into every key.
    ///
    /// Under a computed strategy `Cookie` is replaced by the discriminator,
    /// which still separates whatever the cookie would have.
    pub fn varies_on(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        self.vary_headers.binary_search(&name).is_ok()
    }

    /// Derives the key for `request` under `strategy`.
    ///
    /// `route` only labels the error when the discriminator fails.
    ///
    /// # Errors
    ///
    /// [`KeyDerivationError`] when a computed strategy's discriminator fails.
    /// Callers treat this as a cache miss.
    pub fn derive(
        &self,
        request: &Request,
        strategy: &VaryStrategy,
        route: Option<&str>,
    ) -> Result<CacheKey, KeyDerivationError> {
        let url = self.url_digest(request);
        let vary = match strategy {
            VaryStrategy::UseRequestHeaders => self.vary_digest(request, None),
            VaryStrategy::UseComputedValue(discriminator) => {
                let value =
                    discriminator
                        .evaluate(request)
                        .map_err(|err| KeyDerivationError {
                            route: route.unwrap_or(DEFAULT_ROUTE).to_owned(),
                            reason: format!("{}: {err}", discriminator.name()),
                        })?;
                self.vary_digest(request, Some(&value))
            }
        };

        Ok(CacheKey(format!(
            "vcache.response.{}.{}.{url}.{vary}",
            self.prefix,
            request.method().as_str(),
        )))
    }

    fn url_digest(&self, request: &Request) -> String {
        let mut hasher = Sha256::new();
        if self.include_host {
            hasher.update(request.host().unwrap_or("").to_ascii_lowercase().as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(request.path().as_bytes());
        if let Some(query) = request.query_string().map(normalize_query) {
            if !query.is_empty() {
                hasher.update(b"?");
                hasher.update(query.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    // `discriminator` is `Some` under a computed strategy, which also drops
    // the cookie from the material.
    fn vary_digest(&self, request: &Request, discriminator: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(match discriminator {
            None => b"headers\0".as_slice(),
            Some(_) => b"computed\0".as_slice(),
        });

        for name in &self.vary_headers {
            if name == "cookie" {
                if discriminator.is_some() {
                    continue;
                }
                hasher.update(b"cookie\0");
                hasher.update(canonical_cookies(request).as_bytes());
                hasher.update(b"\0");
                continue;
            }

            let values: Vec<&str> = request.headers().get_all(name).collect();
            hasher.update(name.as_bytes());
            if values.is_empty() {
                hasher.update(b"\x01");
            } else {
                hasher.update(b"\0");
                hasher.update(values.join(", ").as_bytes());
                hasher.update(b"\0");
            }
        }

        if let Some(value) = discriminator {
            hasher.update(b"discriminator\0");
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

// Sort `&`-separated pairs; empty pairs are dropped, duplicates kept.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

// Cookies sorted by name, so header order and spacing do not matter and an
// absent header equals an empty one.
fn canonical_cookies(request: &Request) -> String {
    request
        .cookies()
        .iter()
        .map(|(name, value)| format!("{name}={value};"))
        .collect()
}
