//! Outbound bandwidth throttling.
//!
//! [`MaxBandwidthLayer`] swaps the response body for a [`ThrottledBody`]
//! that paces data frames through a [`RateGate`]. Waiting is a tokio timer,
//! so a throttled connection parks its task instead of a worker thread.
//!
//! The scope is fixed when the layer is built:
//! - [`Global`]: one gate for every exchange; the limit is the aggregate
//!   ceiling across all connections.
//! - [`PerRequest`]: a fresh gate per exchange; each connection gets the
//!   full limit.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::{
    body::Body,
    http::{Request, Response},
};
use futures_util::future::BoxFuture;
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};
use tokio::time::{sleep, Sleep};
use tower::{Layer, Service};

use super::{Limit, RateGate, RequestContext};
use crate::observability::metrics;

/// Chooses which [`RateGate`] an exchange is paced by.
pub trait ThrottleScope: Clone + Send + Sync + 'static {
    fn gate(&self) -> Arc<RateGate>;
}

/// One gate shared by every exchange through the layer.
#[derive(Debug, Clone)]
pub struct Global {
    gate: Arc<RateGate>,
}

impl ThrottleScope for Global {
    fn gate(&self) -> Arc<RateGate> {
        Arc::clone(&self.gate)
    }
}

/// A fresh gate for each exchange.
#[derive(Debug, Clone)]
pub struct PerRequest {
    limit: Limit<i64>,
}

impl ThrottleScope for PerRequest {
    fn gate(&self) -> Arc<RateGate> {
        Arc::new(RateGate::new(self.limit.clone()))
    }
}

/// Limits the bytes per second written by the inner service's responses.
///
/// Use `0` or a negative limit for unlimited bandwidth.
#[derive(Debug, Clone)]
pub struct MaxBandwidthLayer<P> {
    scope: P,
}

impl MaxBandwidthLayer<Global> {
    /// All exchanges share `limit` bytes per second.
    pub fn global(limit: Limit<i64>) -> Self {
        Self {
            scope: Global {
                gate: Arc::new(RateGate::new(limit)),
            },
        }
    }
}

impl MaxBandwidthLayer<PerRequest> {
    /// Every exchange gets its own `limit` bytes per second.
    pub fn per_request(limit: Limit<i64>) -> Self {
        Self {
            scope: PerRequest { limit },
        }
    }
}

impl<S, P: Clone> Layer<S> for MaxBandwidthLayer<P> {
    type Service = MaxBandwidth<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        MaxBandwidth {
            inner,
            scope: self.scope.clone(),
        }
    }
}

/// Service produced by [`MaxBandwidthLayer`].
#[derive(Debug, Clone)]
pub struct MaxBandwidth<S, P> {
    inner: S,
    scope: P,
}

impl<S, P> Service<Request<Body>> for MaxBandwidth<S, P>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    P: ThrottleScope,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let ctx = RequestContext::new(&request);
        let gate = self.scope.gate();
        let future = self.inner.call(request);

        Box::pin(async move {
            let response = future.await?;
            Ok(response.map(|body| Body::new(ThrottledBody::new(body, gate, ctx))))
        })
    }
}

/// A response body whose data frames are released no faster than its gate allows.
pub struct ThrottledBody<B> {
    inner: B,
    gate: Arc<RateGate>,
    ctx: RequestContext,
    /// Unsent tail of the current frame.
    remaining: Bytes,
    /// Slice already cleared by the gate, released once `delay` elapses.
    cleared: Option<Bytes>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl<B> ThrottledBody<B> {
    pub fn new(inner: B, gate: Arc<RateGate>, ctx: RequestContext) -> Self {
        Self {
            inner,
            gate,
            ctx,
            remaining: Bytes::new(),
            cleared: None,
            delay: None,
        }
    }

    fn buffered(&self) -> u64 {
        (self.remaining.len() + self.cleared.as_ref().map_or(0, Bytes::len)) as u64
    }
}

impl<B> HttpBody for ThrottledBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if let Some(delay) = this.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                this.delay = None;
            }

            if let Some(chunk) = this.cleared.take() {
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }

            if !this.remaining.is_empty() {
                let len = this.gate.chunk_len(&this.ctx).min(this.remaining.len());
                let chunk = this.remaining.split_to(len);
                let wait = this.gate.acquire(&this.ctx, chunk.len());
                if wait.is_zero() {
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }

                tracing::trace!(bytes = chunk.len(), wait_ms = wait.as_millis() as u64, "Throttling response write");
                metrics::record_throttle_delay(wait);
                this.cleared = Some(chunk);
                this.delay = Some(Box::pin(sleep(wait)));
                continue;
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => this.remaining = data,
                    Err(frame) => return Poll::Ready(Some(Ok(frame))),
                },
                other => return Poll::Ready(other),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.cleared.is_none() && self.remaining.is_empty() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered();
        let inner = self.inner.size_hint();

        let mut hint = SizeHint::new();
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + buffered);
        }
        hint.set_lower(inner.lower() + buffered);
        hint
    }
}

impl<B> fmt::Debug for ThrottledBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledBody")
            .field("buffered", &self.buffered())
            .field("waiting", &self.delay.is_some())
            .finish_non_exhaustive()
    }
}
