//! `Cache-Control` policy for stored responses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::date::format_http_date;
use crate::http::{Headers, Response};

/// Reads `max-age` from `Cache-Control`, or `None` if absent or malformed.
pub fn max_age(headers: &Headers) -> Option<u64> {
    headers
        .get_list("cache-control")
        .into_iter()
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("max-age") {
                value.trim().trim_matches('"').parse().ok()
            } else {
                None
            }
        })
}

/// Returns `true` if `Cache-Control` forbids a shared store from keeping the
/// response (`no-store`, `private`, or `max-age=0`).
pub fn forbids_storage(headers: &Headers) -> bool {
    let opted_out = headers.get_list("cache-control").into_iter().any(|d| {
        let name = d.split('=').next().unwrap_or("").trim();
        name.eq_ignore_ascii_case("no-store") || name.eq_ignore_ascii_case("private")
    });
    opted_out || max_age(headers) == Some(0)
}

/// TTL for a response: its `max-age` when present, else `default`.
pub fn ttl_for(headers: &Headers, default: Duration) -> Duration {
    max_age(headers).map(Duration::from_secs).unwrap_or(default)
}

/// Fills in freshness and validator headers a stored response is missing.
///
/// Adds `Cache-Control: max-age=<ttl>`, `Expires`, `Last-Modified` (as
/// `now`), and, with `use_etags`, a quoted SHA-256 body `ETag`. Headers the
/// application already set are left alone; an empty `ETag` counts as unset.
pub fn patch_response_headers(
    response: &mut Response,
    ttl: Duration,
    now: DateTime<Utc>,
    use_etags: bool,
) {
    if use_etags && response.etag().is_none() {
        let mut hasher = Sha256::new();
        hasher.update(response.payload());
        let etag = format!("\"{}\"", hex::encode(hasher.finalize()));
        response.headers_mut().set("ETag", etag);
    }

    let headers = response.headers_mut();
    if !headers.contains("last-modified") {
        headers.insert("Last-Modified", format_http_date(now));
    }
    if !headers.contains("expires") {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let expires = now.checked_add_signed(ttl).unwrap_or(now);
        headers.insert("Expires", format_http_date(expires));
    }
    if max_age(headers).is_none() {
        let directive = format!("max-age={}", ttl.as_secs());
        match headers.get("cache-control").map(str::to_owned) {
            Some(existing) if !existing.trim().is_empty() => {
                headers.set("Cache-Control", format!("{existing}, {directive}"));
            }
            _ => headers.set("Cache-Control", directive),
        }
    }
}

const NEVER_CACHE_DIRECTIVES: [&str; 5] =
    ["max-age=0", "no-cache", "no-store", "must-revalidate", "private"];

/// Marks a response as never cacheable, by browsers or by this cache.
///
/// Sets `Expires` to `now` and merges `max-age=0, no-cache, no-store,
/// must-revalidate, private` into `Cache-Control`. Conflicting directives
/// already present (`public`, another `max-age`) are dropped; unrelated
/// ones are kept.
pub fn add_never_cache_headers(response: &mut Response, now: DateTime<Utc>) {
    let headers = response.headers_mut();
    let mut directives: Vec<String> = headers
        .get_list("cache-control")
        .into_iter()
        .filter(|d| {
            let name = d.split('=').next().unwrap_or("").trim().to_ascii_lowercase();
            name != "public"
                && !NEVER_CACHE_DIRECTIVES
                    .iter()
                    .any(|never| never.split('=').next() == Some(name.as_str()))
        })
        .map(str::to_owned)
        .collect();
    directives.extend(NEVER_CACHE_DIRECTIVES.iter().map(|d| (*d).to_owned()));

    headers.set("Cache-Control", directives.join(", "));
    headers.set("Expires", format_http_date(now));
}
