//! Cookie filtering ahead of key derivation.
//!
//! Analytics and other client-side cookies change on every visit and would
//! give each visitor a private cache entry under the default strategy. A
//! [`CookieFilter`] rewrites the `Cookie` header so only cookies the server
//! actually reads remain. Client-side scripts still see every cookie.

use std::collections::HashSet;

use super::config::CacheConfig;
use crate::http::Headers;
use crate::http::headers::cookie_pairs;

/// Which cookies survive filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieFilter {
    /// Keep only the named cookies.
    Allow(HashSet<String>),
    /// Drop the named cookies.
    Strip(HashSet<String>),
}

impl CookieFilter {
    /// Keep only `names`.
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Allow(names.into_iter().map(Into::into).collect())
    }

    /// Drop `names`.
    pub fn strip<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Strip(names.into_iter().map(Into::into).collect())
    }

    /// Builds the filter described by `config`, or `None` when neither list
    /// is set. The allow-list wins if both are (validation rejects that).
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.allowed_cookie_names.is_empty() {
            Some(Self::allow(config.allowed_cookie_names.iter().cloned()))
        } else if !config.strip_cookie_names.is_empty() {
            Some(Self::strip(config.strip_cookie_names.iter().cloned()))
        } else {
            None
        }
    }

    fn keeps(&self, name: &str) -> bool {
        match self {
            Self::Allow(names) => names.contains(name),
            Self::Strip(names) => !names.contains(name),
        }
    }

    /// Rewrites every `Cookie` header into one filtered header.
    ///
    /// The header is removed entirely when nothing survives.
    pub fn apply(&self, headers: &mut Headers) {
        if !headers.contains("cookie") {
            return;
        }

        let kept: Vec<String> = headers
            .get_all("cookie")
            .flat_map(cookie_pairs)
            .filter(|(name, _)| self.keeps(name))
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        if kept.is_empty() {
            headers.remove("cookie");
        } else {
            headers.set("Cookie", kept.join("; "));
        }
    }
}
