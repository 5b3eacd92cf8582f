//! Idle connection timeout.
//!
//! # Responsibilities
//! - Start a watchdog when the exchange begins
//! - Reset it on every request body frame read and response body frame written
//! - Abort the exchange when it fires
//!
//! # Design Decisions
//! - Aborting means failing: the service call returns [`IdleTimeout`] while
//!   the response is still being produced, or the response body yields it
//!   mid-stream. The host then drops the connection without writing a response.
//! - The timeout is read at exchange start and again at every deadline
//!   computation; `Duration::ZERO` disables the guard.
//! - Timers are tokio timers re-armed in place, never a thread per exchange.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
};
use futures_util::future::BoxFuture;
use hyper::body::{Body as HttpBody, Bytes, Frame, SizeHint};
use tokio::time::{sleep_until, Instant, Sleep};
use tower::{BoxError, Layer, Service};

use super::{Limit, RequestContext};
use crate::observability::metrics;

/// How often a disabled watchdog looks at its timeout again.
const DISABLED_RECHECK: Duration = Duration::from_secs(1);

/// The exchange saw no body activity for longer than `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection idle for longer than {timeout:?}")]
pub struct IdleTimeout {
    timeout: Duration,
}

impl IdleTimeout {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Time of the most recent read or write, as nanoseconds since `origin`.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last.fetch_max(nanos, Ordering::AcqRel);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone)]
struct Watchdog {
    activity: Arc<Activity>,
    timeout: Limit<Duration>,
    ctx: Arc<RequestContext>,
}

impl Watchdog {
    fn new(timeout: Limit<Duration>, ctx: RequestContext) -> Self {
        Self {
            activity: Arc::new(Activity::new()),
            timeout,
            ctx: Arc::new(ctx),
        }
    }

    /// When the watchdog fires if nothing happens first, with the timeout in effect.
    ///
    /// `None` while the timeout is zero or too large to land on the clock.
    fn deadline(&self) -> Option<(Instant, Duration)> {
        let timeout = self.timeout.get(&self.ctx);
        if timeout.is_zero() {
            return None;
        }
        let deadline = self.activity.last().checked_add(timeout)?;
        Some((deadline, timeout))
    }

    /// Next instant to look at the timeout again. Without a deadline the
    /// watchdog keeps re-reading the accessor so a limit switched on mid-exchange applies.
    fn next_check(&self) -> Result<Instant, IdleTimeout> {
        match self.deadline() {
            Some((deadline, timeout)) if Instant::now() >= deadline => Err(IdleTimeout { timeout }),
            Some((deadline, _)) => Ok(deadline),
            None => Ok(Instant::now() + DISABLED_RECHECK),
        }
    }

    /// Resolves once the exchange has been idle past its deadline.
    async fn expired(&self) -> IdleTimeout {
        loop {
            match self.next_check() {
                Ok(at) => sleep_until(at).await,
                Err(timeout) => return timeout,
            }
        }
    }
}

/// Aborts exchanges that go idle for longer than the timeout.
#[derive(Debug, Clone)]
pub struct ConnectionTimeoutLayer {
    timeout: Limit<Duration>,
}

impl ConnectionTimeoutLayer {
    /// `Duration::ZERO` disables the timeout.
    pub fn new(timeout: Limit<Duration>) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for ConnectionTimeoutLayer {
    type Service = ConnectionTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectionTimeout {
            inner,
            timeout: self.timeout.clone(),
        }
    }
}

/// Service produced by [`ConnectionTimeoutLayer`].
#[derive(Debug, Clone)]
pub struct ConnectionTimeout<S> {
    inner: S,
    timeout: Limit<Duration>,
}

impl<S> Service<Request<Body>> for ConnectionTimeout<S>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let ctx = RequestContext::new(&request);
        if self.timeout.get(&ctx).is_zero() {
            let future = self.inner.call(request);
            return Box::pin(async move { future.await.map_err(Into::<BoxError>::into) });
        }

        let path = ctx.path().to_owned();
        let watchdog = Watchdog::new(self.timeout.clone(), ctx);
        let activity = Arc::clone(&watchdog.activity);
        let request = request.map(|body| Body::new(ActivityBody { inner: body, activity }));
        let future = self.inner.call(request);

        let guard = watchdog.clone();
        Box::pin(async move {
            tokio::select! {
                result = future => {
                    let response = result.map_err(Into::<BoxError>::into)?;
                    watchdog.activity.touch();
                    Ok(response.map(|body| Body::new(IdleTimeoutBody::new(body, watchdog))))
                }
                timeout = guard.expired() => {
                    tracing::warn!(path = %path, timeout_ms = timeout.timeout.as_millis() as u64, "Connection idle, aborting exchange");
                    metrics::record_idle_timeout();
                    Err(Box::new(timeout) as BoxError)
                }
            }
        })
    }
}

/// Request body that records every frame read as activity.
struct ActivityBody<B> {
    inner: B,
    activity: Arc<Activity>,
}

impl<B> HttpBody for ActivityBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let frame = ready!(Pin::new(&mut self.inner).poll_frame(cx));
        if let Some(Ok(_)) = &frame {
            self.activity.touch();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Response body that fails with [`IdleTimeout`] once the exchange goes idle.
struct IdleTimeoutBody<B> {
    inner: B,
    watchdog: Watchdog,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<B> IdleTimeoutBody<B> {
    fn new(inner: B, watchdog: Watchdog) -> Self {
        Self {
            inner,
            watchdog,
            sleep: None,
        }
    }
}

impl<B> HttpBody for IdleTimeoutBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Poll::Ready(frame) = Pin::new(&mut this.inner).poll_frame(cx) {
            if let Some(Ok(_)) = &frame {
                this.watchdog.activity.touch();
            }
            return Poll::Ready(frame.map(|r| r.map_err(Into::into)));
        }

        loop {
            let deadline = match this.watchdog.next_check() {
                Ok(deadline) => deadline,
                Err(timeout) => {
                    tracing::warn!(
                        path = %this.watchdog.ctx.path(),
                        timeout_ms = timeout.timeout.as_millis() as u64,
                        "Response body idle, aborting exchange"
                    );
                    metrics::record_idle_timeout();
                    return Poll::Ready(Some(Err(Box::new(timeout))));
                }
            };

            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(sleep_until(deadline)));
            if sleep.deadline() != deadline {
                sleep.as_mut().reset(deadline);
            }
            ready!(sleep.as_mut().poll(cx));
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt};
    use std::io;

    fn watchdog(timeout: Duration) -> Watchdog {
        Watchdog::new(Limit::fixed(timeout), RequestContext::default())
    }

    #[tokio::test(start_paused = true)]
    async fn touch_pushes_deadline() {
        let dog = watchdog(Duration::from_secs(1));
        let (first, _) = dog.deadline().unwrap();

        tokio::time::advance(Duration::from_millis(600)).await;
        dog.activity.touch();
        let (second, _) = dog.deadline().unwrap();

        assert_eq!(second - first, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_fires() {
        let dog = watchdog(Duration::ZERO);
        assert!(dog.deadline().is_none());

        let fired = tokio::time::timeout(Duration::from_secs(3600), dog.expired()).await;
        assert!(fired.is_err());
    }

    fn idle_timeout_in<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a IdleTimeout> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(idle) = e.downcast_ref::<IdleTimeout>() {
                return Some(idle);
            }
            current = e.source();
        }
        None
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_fails() {
        let frames = stream::iter(vec![Ok::<_, io::Error>(vec![1u8; 4])])
            .chain(stream::pending());
        let body = IdleTimeoutBody::new(Body::from_stream(frames), watchdog(Duration::from_secs(1)));

        let err = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .unwrap_err();
        let idle = idle_timeout_in(&err).expect("idle timeout error");
        assert_eq!(idle.timeout(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_never_fires() {
        let body = IdleTimeoutBody::new(
            Body::from_stream(stream::pending::<Result<Vec<u8>, io::Error>>()),
            watchdog(Duration::MAX),
        );
        assert!(watchdog(Duration::MAX).deadline().is_none());

        let read = tokio::time::timeout(
            Duration::from_secs(60),
            axum::body::to_bytes(Body::new(body), usize::MAX),
        )
        .await;
        assert!(read.is_err(), "body must still be waiting");
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_lets_slow_handler_finish() {
        let service = ConnectionTimeoutLayer::new(Limit::fixed(Duration::MAX)).layer(tower::service_fn(
            |_req: Request<Body>| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, std::convert::Infallible>(Response::new(Body::from("late")))
            },
        ));

        let response = tower::ServiceExt::oneshot(service, Request::new(Body::empty()))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_switched_on_mid_body_applies() {
        let millis = Arc::new(AtomicU64::new(0));
        let source = Arc::clone(&millis);
        let dog = Watchdog::new(
            Limit::dynamic(move || Duration::from_millis(source.load(Ordering::SeqCst))),
            RequestContext::default(),
        );
        let body = IdleTimeoutBody::new(
            Body::from_stream(stream::pending::<Result<Vec<u8>, io::Error>>()),
            dog,
        );
        let read = tokio::spawn(axum::body::to_bytes(Body::new(body), usize::MAX));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!read.is_finished());

        millis.store(1000, Ordering::SeqCst);
        let err = read.await.unwrap().unwrap_err();
        assert!(idle_timeout_in(&err).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_body_completes() {
        let frames = stream::iter(0..10u8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, io::Error>(vec![i; 8])
        });
        let body = IdleTimeoutBody::new(Body::from_stream(frames), watchdog(Duration::from_secs(1)));

        let bytes = axum::body::to_bytes(Body::new(body), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 80);
    }
}
