//! Outgoing response model.
//!
//! Provides a fluent builder for handler responses plus the accessors the
//! caching layer needs: validators, body bytes, and the store-bypass marker.

use bytes::Bytes;

use super::{Headers, StatusCode};

/// An HTTP response produced by an application handler or replayed from cache.
///
/// Cloning is cheap: the body is a reference-counted [`Bytes`] buffer.
///
/// # Examples
///
/// ```
/// use vcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("ETag", "\"v1\"")
///     .header("Cache-Control", "max-age=60")
///     .body("hello");
///
/// assert_eq!(response.etag(), Some("\"v1\""));
/// assert_eq!(response.payload().as_ref(), b"hello");
/// assert!(!response.is_store_bypassed());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    bypass_store: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            bypass_store: false,
        }
    }

    /// Builds a response from already-separated parts, as a cache replay does.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            bypass_store: false,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the response as never to be written into the response cache.
    ///
    /// The client still receives it unchanged. Use this for handlers that
    /// cache their own output or that only want downstream proxies to cache.
    #[must_use]
    pub fn never_store(mut self) -> Self {
        self.bypass_store = true;
        self
    }

    /// Returns `true` if [`never_store`](Self::never_store) was called.
    pub fn is_store_bypassed(&self) -> bool {
        self.bypass_store
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place decoration.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body bytes.
    pub fn payload(&self) -> &Bytes {
        &self.body
    }

    /// Returns the `ETag` header, ignoring an empty value.
    pub fn etag(&self) -> Option<&str> {
        self.headers
            .get("etag")
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Returns the raw `Last-Modified` header, if present.
    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get("last-modified")
    }

    /// Drops the body, keeping status and headers. Used for `HEAD` replays.
    pub fn strip_body(&mut self) {
        self.body = Bytes::new();
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
