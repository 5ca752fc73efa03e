//! Cache storage: the stored entry type, the backend trait, and an
//! in-memory backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::conditional::StoredValidators;
use super::date::parse_http_date;
use super::error::StoreError;
use crate::http::{Headers, Response, StatusCode};

/// A stored response plus the metadata needed to validate and expire it.
///
/// Entries are serializable so that out-of-process backends can persist
/// them as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub stored_at: DateTime<Utc>,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
}

impl CacheEntry {
    /// Captures `response` under `key`.
    ///
    /// Validators are read from the response headers; an empty `ETag` or an
    /// unparseable `Last-Modified` is recorded as absent.
    pub fn from_response(
        key: impl Into<String>,
        response: &Response,
        stored_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            status: response.status(),
            headers: response.headers().clone(),
            body: response.payload().clone(),
            etag: response.etag().map(str::to_owned),
            last_modified: response.last_modified().and_then(parse_http_date),
            stored_at,
            ttl,
        }
    }

    /// The instant after which the entry is stale.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns `true` once `now` has reached the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// The validators a conditional request is compared against.
    pub fn validators(&self) -> StoredValidators<'_> {
        StoredValidators {
            etag: self.etag.as_deref(),
            last_modified: self.last_modified,
        }
    }

    /// Rebuilds the full stored response.
    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.clone())
    }
}

mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// A key/value store with per-entry TTL.
///
/// # Contract
///
/// - [`get`](Self::get) **must not** return an expired entry.
/// - Implementations are shared across concurrent requests and handle
///   their own synchronization.
/// - No method is called from inside a key-derivation function.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetches a live entry, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Stores `entry` under `key` for `ttl`, replacing any previous entry.
    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), StoreError>;

    /// Removes the entry under `key`. Returns `true` if one existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Process-local [`CacheStore`] backed by a `HashMap`.
///
/// Expired entries are dropped lazily when read and on
/// [`purge_expired`](Self::purge_expired).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use vcache::cache::{CacheEntry, CacheStore, MemoryStore};
/// use vcache::http::{Response, StatusCode};
///
/// # #[tokio::main] async fn main() {
/// let store = MemoryStore::new();
/// let response = Response::new(StatusCode::Ok).body("hi");
/// let ttl = Duration::from_secs(60);
/// let entry = CacheEntry::from_response("k", &response, Utc::now(), ttl);
///
/// store.set("k", entry, ttl).await.unwrap();
/// assert!(store.get("k").await.unwrap().is_some());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if no entries are held.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry that has expired as of now. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer replaced it in the meantime.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, mut entry: CacheEntry, ttl: Duration) -> Result<(), StoreError> {
        entry.ttl = ttl;
        self.entries.write().await.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
