//! Response cache with per-route vary strategies.
//!
//! The cache runs in two phases around the application handler:
//!
//! - [`CacheLayer::fetch`] derives a key, reads the store, and answers with
//!   a full replay, a `304 Not Modified`, or "pass through".
//! - [`CacheLayer::update`] decides whether the handler's response may be
//!   stored and writes it under the key a later equivalent request derives.
//!
//! How requests map to keys is set per route in a [`VaryRegistry`]. The
//! default strategy folds the configured request headers (normally
//! `Cookie`) into the key. A computed strategy replaces the cookie with a
//! low-cardinality discriminator, so e.g. all anonymous visitors share one
//! entry while signed-in users get another.
//!
//! ```
//! use std::sync::Arc;
//! use vcache::cache::{CacheConfig, CacheLayer, MemoryStore, VaryRegistry, VaryStrategy};
//!
//! let registry = VaryRegistry::builder()
//!     .register("/", VaryStrategy::on_header_presence("Authorization"))
//!     .register("/about", VaryStrategy::shared())
//!     .build();
//!
//! let layer = CacheLayer::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(registry),
//!     CacheConfig::default(),
//! );
//! assert_eq!(layer.registry().len(), 2);
//! ```

pub mod conditional;
pub mod config;
pub mod control;
pub mod cookies;
pub mod date;
pub mod error;
pub mod key;
pub mod layer;
pub mod store;
pub mod vary;

pub use conditional::Outcome;
pub use config::CacheConfig;
pub use cookies::CookieFilter;
pub use error::{CacheError, ConfigError, DiscriminatorError, KeyDerivationError, StoreError};
pub use key::{CacheKey, KeyDeriver};
pub use layer::{CacheLayer, FetchOutcome};
pub use store::{CacheEntry, CacheStore, MemoryStore};
pub use vary::{Discriminator, VaryRegistry, VaryRegistryBuilder, VaryStrategy};
