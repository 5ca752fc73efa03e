//! Per-route vary strategies and the registry that holds them.
//!
//! A [`VaryStrategy`] decides which request attributes, besides method and
//! URL, separate one cached variant from another. The default folds in the
//! configured request headers (the `Cookie` header included). A computed
//! strategy replaces the cookie with a discriminator value derived from the
//! request, so that e.g. every anonymous visitor shares one entry no matter
//! what tracking cookies they carry. The discriminator only shapes the
//! storage key; it is never written into a response header.
//!
//! Strategies are registered once at startup on a [`VaryRegistryBuilder`]
//! and frozen into a read-only [`VaryRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::DiscriminatorError;
use crate::http::Request;
use crate::router::Pattern;

/// Signature of a discriminator function.
///
/// Must be deterministic, side-effect free, and fast: it runs on every
/// request to the route, in the hot path. No network or store I/O.
pub type DiscriminatorFn = dyn Fn(&Request) -> Result<String, DiscriminatorError> + Send + Sync;

/// A named, cheaply-cloneable discriminator function.
#[derive(Clone)]
pub struct Discriminator {
    name: String,
    func: Arc<DiscriminatorFn>,
}

impl Discriminator {
    /// Wraps `func` under a descriptive `name` (used in logs only).
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Request) -> Result<String, DiscriminatorError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Computes the discriminator value for `request`.
    pub fn evaluate(&self, request: &Request) -> Result<String, DiscriminatorError> {
        (self.func)(request)
    }
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discriminator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// How a route's cached variants are told apart.
#[derive(Debug, Clone, Default)]
pub enum VaryStrategy {
    /// Fold the configured request headers (at least `Cookie`) into the key.
    #[default]
    UseRequestHeaders,
    /// Fold a computed value into the key instead of the cookies.
    UseComputedValue(Discriminator),
}

impl VaryStrategy {
    /// A computed strategy from an arbitrary function.
    ///
    /// # Examples
    ///
    /// ```
    /// use vcache::cache::VaryStrategy;
    ///
    /// let by_language = VaryStrategy::computed("language", |req| {
    ///     Ok(req.headers().get("accept-language").unwrap_or("en").to_owned())
    /// });
    /// ```
    pub fn computed<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Request) -> Result<String, DiscriminatorError> + Send + Sync + 'static,
    {
        Self::UseComputedValue(Discriminator::new(name, func))
    }

    /// Every request to the route shares a single variant.
    pub fn shared() -> Self {
        Self::computed("shared", |_| Ok(String::new()))
    }

    /// One variant for requests carrying header `name`, one for the rest.
    ///
    /// With `Authorization` this gives "all authenticated users share a
    /// response, all anonymous users share another".
    pub fn on_header_presence(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::computed(format!("header-presence:{name}"), move |req| {
            Ok(req.headers().contains(&name).to_string())
        })
    }

    /// One variant for requests carrying cookie `name`, one for the rest.
    pub fn on_cookie_presence(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::computed(format!("cookie-presence:{name}"), move |req| {
            Ok(req.cookies().contains_key(&name).to_string())
        })
    }

    /// One variant per distinct value of cookie `name`; requests without it
    /// share the `"0"` variant.
    pub fn on_cookie_value(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::computed(format!("cookie-value:{name}"), move |req| {
            Ok(req
                .cookies()
                .remove(&name)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "0".to_owned()))
        })
    }

    /// Returns `true` for the computed variant.
    pub fn is_computed(&self) -> bool {
        matches!(self, Self::UseComputedValue(_))
    }
}

// A registered route: its identifier, the compiled pattern, and strategy.
struct Registration {
    route: String,
    pattern: Pattern,
    strategy: VaryStrategy,
}

/// Configuration-time collector for per-route strategies.
///
/// Registering the same route twice replaces the earlier strategy; it never
/// stacks.
#[derive(Default)]
pub struct VaryRegistryBuilder {
    registrations: Vec<Registration>,
}

impl VaryRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy for `route`.
    ///
    /// `route` is both the opaque identifier adapters tag requests with and
    /// a router-style pattern (`/users/:id`, `/files/*`) used when a request
    /// carries no identifier.
    #[must_use]
    pub fn register(mut self, route: impl Into<String>, strategy: VaryStrategy) -> Self {
        let route = route.into();
        match self.registrations.iter_mut().find(|r| r.route == route) {
            Some(existing) => existing.strategy = strategy,
            None => self.registrations.push(Registration {
                pattern: Pattern::parse(&route),
                route,
                strategy,
            }),
        }
        self
    }

    /// Freezes the registrations. The result is read-only.
    pub fn build(self) -> VaryRegistry {
        let index = self
            .registrations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.route.clone(), i))
            .collect();
        VaryRegistry {
            registrations: self.registrations,
            index,
            default: VaryStrategy::UseRequestHeaders,
        }
    }
}

/// Read-only route → strategy mapping consulted on every request.
///
/// # Examples
///
/// ```
/// use vcache::cache::{VaryRegistry, VaryStrategy};
/// use vcache::http::{Method, Request};
///
/// let registry = VaryRegistry::builder()
///     .register("/dashboard", VaryStrategy::on_header_presence("Authorization"))
///     .build();
///
/// let tagged = Request::new(Method::Get, "/dashboard").route("/dashboard");
/// assert!(registry.resolve(&tagged).1.is_computed());
///
/// let other = Request::new(Method::Get, "/about");
/// assert!(!registry.resolve(&other).1.is_computed());
/// ```
pub struct VaryRegistry {
    registrations: Vec<Registration>,
    index: HashMap<String, usize>,
    default: VaryStrategy,
}

impl Default for VaryRegistry {
    fn default() -> Self {
        VaryRegistryBuilder::new().build()
    }
}

impl fmt::Debug for VaryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.registrations.iter().map(|r| (&r.route, &r.strategy)))
            .finish()
    }
}

impl VaryRegistry {
    pub fn builder() -> VaryRegistryBuilder {
        VaryRegistryBuilder::new()
    }

    /// Strategy registered under exactly `route`, if any.
    pub fn lookup(&self, route: &str) -> Option<&VaryStrategy> {
        self.index
            .get(route)
            .map(|&i| &self.registrations[i].strategy)
    }

    /// Resolves the strategy for `request`, returning the matched route too.
    ///
    /// Order: the request's route identifier, then the first registered
    /// pattern matching the path, then the default `UseRequestHeaders`.
    pub fn resolve<'a>(&'a self, request: &Request) -> (Option<&'a str>, &'a VaryStrategy) {
        if let Some(route) = request.route_id() {
            if let Some(&i) = self.index.get(route) {
                let reg = &self.registrations[i];
                return (Some(reg.route.as_str()), &reg.strategy);
            }
        }

        self.registrations
            .iter()
            .find(|r| r.pattern.matches(request.path()).is_some())
            .map(|r| (Some(r.route.as_str()), &r.strategy))
            .unwrap_or((None, &self.default))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
