//! HTTP server driving the guard stack.
//!
//! # Responsibilities
//! - Accept connections from the bounded [`Listener`]
//! - Serve each one over HTTP/1.1 or HTTP/2 with hyper-util's auto builder
//! - Close connections whose service call fails (an idle timeout aborts
//!   the exchange this way, so the client sees the connection drop)
//! - On shutdown, stop accepting, close connections gracefully and wait
//!   for them to drain

use std::time::Duration;

use axum::{body::Body, http::Request};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tower::ServiceExt;

use crate::http::stack::GuardService;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// How long shutdown waits for open connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves a [`GuardService`] on every accepted connection.
pub struct HttpServer {
    service: GuardService,
    builder: auto::Builder<TokioExecutor>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl HttpServer {
    pub fn new(service: GuardService) -> Self {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder.http1().timer(TokioTimer::new());
        builder.http2().timer(TokioTimer::new());

        Self {
            service,
            builder,
            tracker: ConnectionTracker::new(),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Open connections, for observing the drain.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "HTTP server starting");
        }

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => break,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(ListenerError::Closed) => break,
                Err(e) => return Err(e),
            };

            let guarded = self.service.clone();
            let service = service_fn(move |request: Request<Incoming>| {
                let guarded = guarded.clone();
                async move {
                    guarded
                        .oneshot(request.map(Body::new))
                        .await
                        .map_err(std::io::Error::other)
                }
            });
            let builder = self.builder.clone();
            let guard = self.tracker.track();
            let mut stop = shutdown.subscribe();

            tokio::spawn(async move {
                let _permit = permit;
                let connection_id = guard.id();
                tracing::debug!(%connection_id, %peer_addr, "Serving connection");

                let connection = builder
                    .serve_connection(TokioIo::new(stream), service);
                tokio::pin!(connection);

                let mut closing = false;
                loop {
                    tokio::select! {
                        result = connection.as_mut() => {
                            if let Err(e) = result {
                                tracing::debug!(%connection_id, error = %e, "Connection ended with error");
                            }
                            break;
                        }
                        _ = stop.recv(), if !closing => {
                            closing = true;
                            connection.as_mut().graceful_shutdown();
                        }
                    }
                }
                drop(guard);
            });
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        if !self.tracker.wait_for_drain(self.drain_timeout).await {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                "Drain deadline passed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
