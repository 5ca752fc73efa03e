//! Error types for the caching layer.
//!
//! None of these ever reach a client: every stage treats a failure as
//! "behave as if caching were disabled" and logs it instead.

use thiserror::Error;

/// A route's discriminator could not produce a value for a request.
#[derive(Debug, Error)]
#[error("discriminator for route {route} failed: {reason}")]
pub struct KeyDerivationError {
    /// Route identifier (or `"<default>"`) whose strategy failed.
    pub route: String,
    /// Failure reported by the discriminator.
    pub reason: String,
}

/// Failure reported by a discriminator function.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DiscriminatorError(pub String);

impl DiscriminatorError {
    /// Creates an error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors surfaced by a [`CacheStore`](super::CacheStore) backend.
///
/// [`MemoryStore`](super::MemoryStore) never fails; external backends report
/// connection and encoding failures through [`Unavailable`](Self::Unavailable).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced while loading or validating [`CacheConfig`](super::CacheConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cache config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("status code {0} cannot be cached")]
    InvalidStatus(u16),

    #[error("vary_headers contains an empty header name")]
    EmptyVaryHeader,

    #[error("allowed_cookie_names and strip_cookie_names are mutually exclusive")]
    ConflictingCookieLists,
}

/// Failure of an explicit cache operation such as invalidation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Key(#[from] KeyDerivationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
