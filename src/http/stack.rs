//! Composition of the guards into one service.
//!
//! Outermost first:
//! ```text
//! MaxConcurrentRequests (503)
//!     → MaxQueryStringLength (414)
//!     → ConnectionTimeout (abort on idle)
//!     → MaxBandwidth (global or per request)
//!     → application router
//! ```
//! The idle watchdog sits outside the throttle so every paced frame counts
//! as write activity.

use std::convert::Infallible;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use tower::{util::BoxCloneService, BoxError, Layer, ServiceBuilder};

use crate::config::{BandwidthScope, SharedLimits};
use crate::limits::{
    AdmissionController, ConnectionTimeoutLayer, Global, MaxBandwidthLayer,
    MaxConcurrentRequestsLayer, MaxQueryStringLengthLayer, PerRequest,
};

/// The guarded application as a single cloneable service.
pub type GuardService = BoxCloneService<Request<Body>, Response<Body>, BoxError>;

#[derive(Debug, Clone)]
enum Throttle {
    Global(MaxBandwidthLayer<Global>),
    PerRequest(MaxBandwidthLayer<PerRequest>),
}

/// The guard layers, built once and reused for every connection.
#[derive(Debug, Clone)]
pub struct GuardStack {
    admission: MaxConcurrentRequestsLayer,
    query_string: MaxQueryStringLengthLayer,
    idle_timeout: ConnectionTimeoutLayer,
    throttle: Throttle,
}

impl GuardStack {
    /// Build the guards over live limits. The bandwidth scope is fixed here.
    pub fn new(limits: &SharedLimits, scope: BandwidthScope) -> Self {
        let throttle = match scope {
            BandwidthScope::Global => Throttle::Global(MaxBandwidthLayer::global(limits.max_bandwidth())),
            BandwidthScope::PerRequest => {
                Throttle::PerRequest(MaxBandwidthLayer::per_request(limits.max_bandwidth()))
            }
        };

        Self {
            admission: MaxConcurrentRequestsLayer::new(limits.max_concurrent_requests()),
            query_string: MaxQueryStringLengthLayer::new(limits.max_query_string_length()),
            idle_timeout: ConnectionTimeoutLayer::new(limits.connection_timeout()),
            throttle,
        }
    }

    /// Replace the 414 reason phrase.
    pub fn with_query_string_reason_phrase<F>(mut self, reason_phrase: F) -> Self
    where
        F: Fn(u64) -> String + Send + Sync + 'static,
    {
        self.query_string = self.query_string.with_reason_phrase(reason_phrase);
        self
    }

    /// The admission counter shared by every service built from this stack.
    pub fn controller(&self) -> &AdmissionController {
        self.admission.controller()
    }

    /// Wrap `app` in every guard.
    pub fn service(&self, app: Router) -> GuardService {
        let throttled: BoxCloneService<Request<Body>, Response<Body>, Infallible> = match &self.throttle {
            Throttle::Global(layer) => BoxCloneService::new(layer.layer(app)),
            Throttle::PerRequest(layer) => BoxCloneService::new(layer.layer(app)),
        };

        let service = ServiceBuilder::new()
            .layer(self.admission.clone())
            .layer(self.query_string.clone())
            .layer(self.idle_timeout.clone())
            .service(throttled);

        BoxCloneService::new(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use axum::{http::StatusCode, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn rejects_long_query_before_the_app() {
        let limits = SharedLimits::new(LimitsConfig {
            max_query_string_length: 3,
            ..Default::default()
        });
        let stack = GuardStack::new(&limits, BandwidthScope::Global);

        let request = Request::builder().uri("/?abcd").body(Body::empty()).unwrap();
        let response = stack.service(app()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::URI_TOO_LONG);
        // The rejection body still holds the admission slot.
        assert_eq!(stack.controller().in_flight(), 1);

        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(stack.controller().in_flight(), 0);
    }

    #[tokio::test]
    async fn custom_reason_phrase_reaches_the_response() {
        let limits = SharedLimits::new(LimitsConfig {
            max_query_string_length: 1,
            ..Default::default()
        });
        let stack = GuardStack::new(&limits, BandwidthScope::PerRequest)
            .with_query_string_reason_phrase(|limit| format!("max {limit}"));

        let request = Request::builder().uri("/?ab").body(Body::empty()).unwrap();
        let response = stack.service(app()).oneshot(request).await.unwrap();
        let reason = response.extensions().get::<hyper::ext::ReasonPhrase>().unwrap();
        assert_eq!(reason.as_bytes(), b"max 1");
    }

    #[tokio::test]
    async fn passes_through_when_unlimited() {
        let limits = SharedLimits::new(LimitsConfig::default());
        let stack = GuardStack::new(&limits, BandwidthScope::Global);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = stack.service(app()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
        assert_eq!(stack.controller().in_flight(), 0);
    }
}
