//! Cache layer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Settings for [`CacheLayer`](super::CacheLayer).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use vcache::cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "key_prefix": "site1", "default_ttl_secs": 60 }"#).unwrap();
/// assert_eq!(config.key_prefix, "site1");
/// assert_eq!(config.vary_headers, vec!["Cookie".to_owned()]);
/// assert_eq!(config.cacheable_statuses, vec![200]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to every key.
    pub key_prefix: String,
    /// TTL for responses without a `Cache-Control: max-age`.
    pub default_ttl_secs: u64,
    /// Fold the `Host` header into the URL portion of the key.
    pub include_host: bool,
    /// Request headers folded into the key under `UseRequestHeaders`.
    pub vary_headers: Vec<String>,
    /// Response statuses eligible for storage.
    pub cacheable_statuses: Vec<u16>,
    /// Add `Cache-Control`, `Expires`, and `Last-Modified` to stored
    /// responses that lack them.
    pub patch_headers: bool,
    /// Add a body-hash `ETag` to stored responses that lack one. Only
    /// applies when `patch_headers` is on.
    pub use_etags: bool,
    /// Header added to full replays, e.g. `X-From-Cache`.
    pub hit_header: Option<String>,
    /// Keep only these cookies before keying.
    pub allowed_cookie_names: Vec<String>,
    /// Drop these cookies before keying.
    pub strip_cookie_names: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            default_ttl_secs: 600,
            include_host: false,
            vary_headers: vec!["Cookie".to_owned()],
            cacheable_statuses: vec![200],
            patch_headers: true,
            use_etags: true,
            hit_header: None,
            allowed_cookie_names: Vec::new(),
            strip_cookie_names: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(&status) = self
            .cacheable_statuses
            .iter()
            .find(|&&s| !(200..400).contains(&s) || s == 304)
        {
            return Err(ConfigError::InvalidStatus(status));
        }
        if self.vary_headers.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::EmptyVaryHeader);
        }
        if !self.allowed_cookie_names.is_empty() && !self.strip_cookie_names.is_empty() {
            return Err(ConfigError::ConflictingCookieLists);
        }
        Ok(())
    }

    /// `default_ttl_secs` as a [`Duration`].
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns `true` if responses with `status` may be stored.
    pub fn is_cacheable_status(&self, status: u16) -> bool {
        self.cacheable_statuses.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config = CacheConfig::from_json("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.default_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn rejects_uncacheable_statuses() {
        let err = CacheConfig::from_json(r#"{ "cacheable_statuses": [200, 500] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStatus(500)));
        let err = CacheConfig::from_json(r#"{ "cacheable_statuses": [304] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStatus(304)));
    }

    #[test]
    fn rejects_conflicting_cookie_lists() {
        let err = CacheConfig::from_json(
            r#"{ "allowed_cookie_names": ["sessionid"], "strip_cookie_names": ["_ga"] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCookieLists));
    }

    #[test]
    fn rejects_blank_vary_header() {
        let err = CacheConfig::from_json(r#"{ "vary_headers": ["Cookie", " "] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyVaryHeader));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            CacheConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = CacheConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
