//! Read-only view over the current request.
//!
//! Handed to [`Limit`](super::Limit) accessors so a limit can vary per
//! request (e.g. a tighter bandwidth cap for `/downloads`). The snapshot is
//! owned because some guards consult their accessor while the response body
//! streams, long after the request itself was handed to the inner service.

use axum::http::{header, HeaderMap, Method, Request, Uri};

/// Snapshot of the parts of a request that limit accessors may inspect.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl RequestContext {
    /// Capture the method, URI and headers of `request`.
    pub fn new<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The raw (still percent-encoded) query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Host from the URI authority, falling back to the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.uri.host().or_else(|| {
            self.headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
        })
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
        }
    }
}
