//! # vcache
//!
//! An HTTP response cache whose keys vary per route: by request headers
//! (the default, cookie included) or by a computed discriminator such as
//! "is this visitor signed in".
//!
//! The core is framework-agnostic: [`cache::CacheLayer::fetch`] runs before
//! the application handler and [`cache::CacheLayer::update`] after it. The
//! [`middleware`] and [`router`] modules wire those two calls into a
//! request pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vcache::cache::{CacheConfig, CacheLayer, MemoryStore, VaryRegistry, VaryStrategy};
//! use vcache::{Method, Request, Response, Router, StatusCode};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::from_json(r#"{ "key_prefix": "site", "default_ttl_secs": 300 }"#)?;
//!
//! // Anonymous visitors share one copy of the home page whatever cookies
//! // they carry; signed-in users get their own.
//! let registry = VaryRegistry::builder()
//!     .register("/", VaryStrategy::on_cookie_presence("sessionid"))
//!     .build();
//!
//! let layer = CacheLayer::new(Arc::new(MemoryStore::new()), Arc::new(registry), config);
//! let mut router = Router::with_cache(Arc::new(layer));
//! router.get("/", |_ctx| async { Response::new(StatusCode::Ok).body("Hello, World!") });
//!
//! let first = router.route(Request::new(Method::Get, "/").header("Cookie", "_ga=1")).await;
//! let etag = first.etag().unwrap_or_default().to_owned();
//!
//! let revalidated = router
//!     .route(Request::new(Method::Get, "/").header("If-None-Match", etag))
//!     .await;
//! assert_eq!(revalidated.status(), StatusCode::NotModified);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;

pub use cache::{CacheConfig, CacheLayer, FetchOutcome, VaryRegistry, VaryStrategy};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
