//! Per-request context handed to middleware and route handlers.

use std::collections::HashMap;

use crate::Request;

/// Path parameters extracted from the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A request plus whatever the router learned about it.
///
/// Middleware may rewrite the request in place (the cookie filter does)
/// before it reaches the cache or the handler.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    #[test]
    fn params_lookup() {
        let mut params = PathParams::new();
        assert!(params.is_empty());
        params.insert("id".into(), "7".into());
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("other"), None);
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn request_is_mutable_through_context() {
        let mut ctx = Context::new(Request::new(Method::Get, "/").header("Cookie", "a=1"));
        ctx.request_mut().headers_mut().remove("cookie");
        assert!(!ctx.request().headers().contains("cookie"));
        assert_eq!(ctx.into_request().path(), "/");
    }
}
