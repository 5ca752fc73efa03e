//! Conditional-request evaluation (`If-None-Match` / `If-Modified-Since`).
//!
//! Decides whether a stored response can be answered with `304 Not Modified`.
//! The entity tag is authoritative whenever both sides have one: a matching
//! timestamp cannot turn an ETag mismatch into a false 304. Entries stored
//! without an ETag are judged by `Last-Modified` alone.

use chrono::{DateTime, Utc};

use super::date::{parse_http_date, truncate_to_seconds};
use crate::http::Headers;

/// Result of comparing request validators with a stored entry's validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client's copy is current; answer `304`.
    NotModified,
    /// The client needs the full stored response.
    Modified,
}

/// One element of an `If-None-Match` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTagCondition {
    /// `*`: matches any current representation.
    Any,
    /// A literal entity tag, kept verbatim (quotes and `W/` prefix included).
    Tag(String),
}

/// Validators sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestValidators {
    /// Parsed `If-None-Match`; `None` when the header is absent.
    pub if_none_match: Option<Vec<EntityTagCondition>>,
    /// Parsed `If-Modified-Since`; `None` when absent or unparseable.
    pub if_modified_since: Option<DateTime<Utc>>,
}

impl RequestValidators {
    /// Extracts validators from request headers.
    ///
    /// A malformed `If-Modified-Since` is treated as absent. An
    /// `If-None-Match` header that contains no tags at all is also absent.
    pub fn from_headers(headers: &Headers) -> Self {
        let tags: Vec<EntityTagCondition> = headers
            .get_all("if-none-match")
            .flat_map(split_entity_tags)
            .collect();

        Self {
            if_none_match: (!tags.is_empty()).then_some(tags),
            if_modified_since: headers.get("if-modified-since").and_then(parse_http_date),
        }
    }
}

/// Validators recorded on a stored entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredValidators<'a> {
    pub etag: Option<&'a str>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Compares client and stored validators.
///
/// Policy, in order:
///
/// 1. The entry has an `ETag` and the request sends `If-None-Match`:
///    `NotModified` iff some listed tag equals the stored `ETag` exactly, or
///    the list contains `*`. `If-Modified-Since` is not consulted.
/// 2. Otherwise, `If-Modified-Since` present and the entry has
///    `Last-Modified`: `NotModified` iff stored ≤ requested, compared in whole
///    seconds. An `If-None-Match` against an entry without an ETag lands here.
/// 3. Otherwise `Modified`.
///
/// # Examples
///
/// ```
/// use vcache::cache::conditional::{evaluate, Outcome, RequestValidators, StoredValidators};
/// use vcache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("If-None-Match", "\"abc\"");
/// let request = RequestValidators::from_headers(&headers);
/// let stored = StoredValidators { etag: Some("\"abc\""), last_modified: None };
///
/// assert_eq!(evaluate(&request, &stored), Outcome::NotModified);
/// ```
pub fn evaluate(request: &RequestValidators, stored: &StoredValidators<'_>) -> Outcome {
    if let (Some(conditions), Some(etag)) = (&request.if_none_match, stored.etag) {
        let matched = conditions.iter().any(|condition| match condition {
            EntityTagCondition::Any => true,
            EntityTagCondition::Tag(tag) => tag == etag,
        });
        return if matched {
            Outcome::NotModified
        } else {
            Outcome::Modified
        };
    }

    match (request.if_modified_since, stored.last_modified) {
        (Some(since), Some(modified))
            if truncate_to_seconds(modified) <= truncate_to_seconds(since) =>
        {
            Outcome::NotModified
        }
        _ => Outcome::Modified,
    }
}

// Split one `If-None-Match` value on commas that sit outside quoted tags.
fn split_entity_tags(value: &str) -> Vec<EntityTagCondition> {
    let mut tags = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                push_tag(&mut tags, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push_tag(&mut tags, &current);
    tags
}

fn push_tag(tags: &mut Vec<EntityTagCondition>, raw: &str) {
    let raw = raw.trim();
    match raw {
        "" => {}
        "*" => tags.push(EntityTagCondition::Any),
        tag => tags.push(EntityTagCondition::Tag(tag.to_owned())),
    }
}
