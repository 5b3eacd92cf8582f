//! Query string length guard.
//!
//! The limit applies to the percent-decoded query string, so `%41%42` counts
//! as two characters. Requests without a query string always pass.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
};
use futures_util::future::{self, BoxFuture};
use percent_encoding::percent_decode_str;
use tower::{Layer, Service};

use super::accessor::ceiling;
use super::response::rejection;
use super::{Limit, RequestContext};
use crate::observability::metrics;

type ReasonPhraseFn = dyn Fn(u64) -> String + Send + Sync;

fn default_reason_phrase(limit: u64) -> String {
    format!("The (unescaped) querystring is too long. Only {limit} characters are allowed.")
}

/// Length of `query` after percent-decoding, in characters.
pub fn decoded_len(query: &str) -> u64 {
    percent_decode_str(query).decode_utf8_lossy().chars().count() as u64
}

/// Rejects requests whose decoded query string is longer than the limit with
/// `414 URI Too Long`.
#[derive(Clone)]
pub struct MaxQueryStringLengthLayer {
    limit: Limit<i64>,
    reason_phrase: Arc<ReasonPhraseFn>,
}

impl MaxQueryStringLengthLayer {
    /// Use `0` or a negative limit to accept query strings of any length.
    pub fn new(limit: Limit<i64>) -> Self {
        Self {
            limit,
            reason_phrase: Arc::new(default_reason_phrase),
        }
    }

    /// Replace the reason phrase; the closure receives the limit in effect.
    pub fn with_reason_phrase<F>(mut self, reason_phrase: F) -> Self
    where
        F: Fn(u64) -> String + Send + Sync + 'static,
    {
        self.reason_phrase = Arc::new(reason_phrase);
        self
    }
}

impl fmt::Debug for MaxQueryStringLengthLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxQueryStringLengthLayer")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for MaxQueryStringLengthLayer {
    type Service = MaxQueryStringLength<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaxQueryStringLength {
            inner,
            limit: self.limit.clone(),
            reason_phrase: Arc::clone(&self.reason_phrase),
        }
    }
}

/// Service produced by [`MaxQueryStringLengthLayer`].
#[derive(Clone)]
pub struct MaxQueryStringLength<S> {
    inner: S,
    limit: Limit<i64>,
    reason_phrase: Arc<ReasonPhraseFn>,
}

impl<S> Service<Request<Body>> for MaxQueryStringLength<S>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if let Some(query) = request.uri().query().filter(|q| !q.is_empty()) {
            let ctx = RequestContext::new(&request);
            if let Some(limit) = ceiling(self.limit.get(&ctx)) {
                let length = decoded_len(query);
                if length > limit {
                    tracing::info!(length, limit, path = %ctx.path(), "Query string too long, request rejected");
                    metrics::record_rejected("query_string");
                    let response = rejection(StatusCode::URI_TOO_LONG, (self.reason_phrase)(limit));
                    return Box::pin(future::ready(Ok(response)));
                }
            }
        }

        Box::pin(self.inner.call(request))
    }
}

impl<S: fmt::Debug> fmt::Debug for MaxQueryStringLength<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxQueryStringLength")
            .field("inner", &self.inner)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
