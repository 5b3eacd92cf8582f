//! Concurrent request admission.
//!
//! # Responsibilities
//! - Count exchanges that are in flight through one layer instance
//! - Reject the exchange that would exceed the limit with 503
//! - Release the slot on every exit path
//!
//! # Design Decisions
//! - The counter is a lone `AtomicUsize`; no lock is held across the inner call
//! - A slot is an RAII [`InFlightPermit`], released on drop, so success,
//!   error, panic and client disconnect all decrement exactly once
//! - The permit travels with the response body: an exchange ends when its
//!   body is finished, not when its headers are ready
//! - No queueing: an exchange over the limit is answered at once

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
};
use futures_util::future::{self, BoxFuture};
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};
use tower::{Layer, Service};

use super::accessor::ceiling;
use super::response::rejection;
use super::{Limit, RequestContext};
use crate::observability::metrics;

const REJECTION_REASON: &str = "Service Unavailable";

/// Outcome of [`AdmissionController::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The exchange may run; hold the permit until it ends.
    Proceed(InFlightPermit),
    /// The exchange would have been number `in_flight` against `limit`.
    Reject { in_flight: usize, limit: usize },
}

/// Thread-safe in-flight counter with a live limit.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    in_flight: Arc<AtomicUsize>,
    limit: Limit<i64>,
}

impl AdmissionController {
    /// `limit <= 0` admits everything.
    pub fn new(limit: Limit<i64>) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Decide whether the exchange described by `ctx` may proceed.
    pub fn admit(&self, ctx: &RequestContext) -> Admission {
        let limit = ceiling(self.limit.get(ctx))
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        let permit = InFlightPermit::acquire(&self.in_flight);
        let in_flight = permit.position;
        tracing::debug!(in_flight, limit, "Concurrent request");

        if in_flight > limit {
            drop(permit);
            return Admission::Reject { in_flight, limit };
        }
        metrics::set_in_flight(in_flight);
        Admission::Proceed(permit)
    }

    /// Number of exchanges currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// One admitted exchange. Releases its slot when dropped.
pub struct InFlightPermit {
    in_flight: Arc<AtomicUsize>,
    position: usize,
}

impl InFlightPermit {
    fn acquire(in_flight: &Arc<AtomicUsize>) -> Self {
        let position = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            in_flight: Arc::clone(in_flight),
            position,
        }
    }

    /// Counter value observed right after this permit's increment.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_in_flight(remaining);
        tracing::trace!(in_flight = remaining, "Concurrent request finished");
    }
}

impl fmt::Debug for InFlightPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightPermit")
            .field("position", &self.position)
            .finish()
    }
}

/// Limits the number of exchanges handled concurrently by the inner service.
#[derive(Debug, Clone)]
pub struct MaxConcurrentRequestsLayer {
    controller: AdmissionController,
}

impl MaxConcurrentRequestsLayer {
    /// Use `0` or a negative limit for an unlimited number of concurrent requests.
    pub fn new(limit: Limit<i64>) -> Self {
        Self {
            controller: AdmissionController::new(limit),
        }
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }
}

impl<S> Layer<S> for MaxConcurrentRequestsLayer {
    type Service = MaxConcurrentRequests<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaxConcurrentRequests {
            inner,
            controller: self.controller.clone(),
        }
    }
}

/// Service produced by [`MaxConcurrentRequestsLayer`].
#[derive(Debug, Clone)]
pub struct MaxConcurrentRequests<S> {
    inner: S,
    controller: AdmissionController,
}

impl<S> Service<Request<Body>> for MaxConcurrentRequests<S>
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
        let ctx = RequestContext::new(&request);

        let permit = match self.controller.admit(&ctx) {
            Admission::Proceed(permit) => permit,
            Admission::Reject { in_flight, limit } => {
                tracing::info!(
                    in_flight,
                    limit,
                    path = %ctx.path(),
                    "Concurrency limit reached, request rejected"
                );
                metrics::record_rejected("concurrency");
                let response = rejection(StatusCode::SERVICE_UNAVAILABLE, REJECTION_REASON.into());
                return Box::pin(future::ready(Ok(response)));
            }
        };

        let future = self.inner.call(request);
        Box::pin(async move {
            let response = future.await?;
            Ok(response.map(|body| Body::new(InFlightBody { inner: body, _permit: permit })))
        })
    }
}

/// Response body that keeps its exchange's slot until it is finished or dropped.
struct InFlightBody<B> {
    inner: B,
    _permit: InFlightPermit,
}

impl<B> HttpBody for InFlightBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
