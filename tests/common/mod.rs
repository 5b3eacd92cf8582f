//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::Query,
    http::{Request, Response},
    routing::get,
    Router,
};
use futures_util::stream::{self, StreamExt};
use request_guards::config::{BandwidthScope, LimitsConfig, SharedLimits};
use request_guards::http::{GuardStack, HttpServer};
use request_guards::lifecycle::Shutdown;
use request_guards::net::Listener;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Deserialize)]
pub struct Sleep {
    ms: u64,
}

/// Routes used by the end-to-end tests:
/// - `/` answers `ok`
/// - `/slow?ms=N` answers after N milliseconds
/// - `/bytes/{n}` answers with n bytes
pub fn test_app() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/slow",
            get(|Query(sleep): Query<Sleep>| async move {
                tokio::time::sleep(Duration::from_millis(sleep.ms)).await;
                "done"
            }),
        )
        .route(
            "/bytes/{n}",
            get(|axum::extract::Path(n): axum::extract::Path<usize>| async move { vec![b'x'; n] }),
        )
}

/// A handler that finishes after `delay`.
pub async fn delayed(_request: Request<Body>, delay: Duration) -> Result<Response<Body>, Infallible> {
    tokio::time::sleep(delay).await;
    Ok(Response::new(Body::from("done")))
}

/// A body of `chunks` frames of `size` bytes, one every `every`.
pub fn trickle(chunks: usize, size: usize, every: Duration) -> Body {
    let frames = stream::iter(0..chunks).then(move |_| async move {
        tokio::time::sleep(every).await;
        Ok::<_, Infallible>(Bytes::from(vec![b'x'; size]))
    });
    Body::from_stream(frames)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.handle.await;
    }
}

/// Serve `app` behind the guards on an ephemeral local port.
pub async fn spawn_server(limits: LimitsConfig, app: Router) -> TestServer {
    let scope = limits.bandwidth_scope;
    let limits = SharedLimits::new(limits);
    spawn_server_with(&limits, scope, app).await
}

pub async fn spawn_server_with(limits: &SharedLimits, scope: BandwidthScope, app: Router) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, 64);
    let addr = listener.local_addr().unwrap();

    let guards = GuardStack::new(limits, scope);
    let server = HttpServer::new(guards.service(app)).with_drain_timeout(Duration::from_secs(2));

    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });

    TestServer { addr, shutdown, handle }
}
