//! Incoming request model.
//!
//! Requests are either built directly by a framework adapter
//! ([`Request::new`] plus the builder methods) or parsed from raw HTTP/1.1
//! bytes with the [`httparse`] crate ([`Request::parse`]).

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use super::headers::cookie_pairs;
use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// An HTTP request as seen by the caching layer.
///
/// Besides method, path, query and headers, a request may carry an opaque
/// route identifier. The router (or any adapter) sets it once the route is
/// known; the vary registry uses it to pick the route's strategy.
///
/// # Examples
///
/// ```
/// use vcache::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/articles?page=2")
///     .header("Cookie", "sessionid=abc; theme=dark")
///     .route("/articles");
///
/// assert_eq!(request.path(), "/articles");
/// assert_eq!(request.query_string(), Some("page=2"));
/// assert_eq!(request.cookies().get("theme").map(String::as_str), Some("dark"));
/// assert_eq!(request.route_id(), Some("/articles"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
    route: Option<String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates a request for `target`, which may include a `?query` suffix.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            query,
            headers: Headers::new(),
            body: Bytes::new(),
            route: None,
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the method, keeping target, headers, and route.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Tags the request with a route identifier.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Sets the route identifier in place. Used by adapters that only hold
    /// a mutable borrow.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = split_target(target);

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                path,
                query,
                headers: header_map,
                body,
                route: None,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request headers for in-place filtering.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the route identifier, if an adapter has set one.
    pub fn route_id(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Returns the `Host` header, if present.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }

    /// Returns the cookies from every `Cookie` header, keyed by name.
    ///
    /// When a name repeats, the first occurrence wins, matching how browsers
    /// order more specific cookies first.
    pub fn cookies(&self) -> BTreeMap<String, String> {
        let mut cookies = BTreeMap::new();
        for header in self.headers.get_all("cookie") {
            for (name, value) in cookie_pairs(header) {
                cookies
                    .entry(name.to_owned())
                    .or_insert_with(|| value.to_owned());
            }
        }
        cookies
    }
}

// Split a request target into path and optional query string.
fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}
