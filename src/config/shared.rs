//! Live view of the `[limits]` section.
//!
//! The guards take [`Limit`] accessors; the accessors handed out here read
//! whatever limits are current at the moment of each decision, so a reload
//! takes effect on the next request without rebuilding the pipeline.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::schema::LimitsConfig;
use crate::limits::{Limit, RequestContext};

/// Atomically swappable limits shared by every guard.
#[derive(Debug, Clone)]
pub struct SharedLimits {
    current: Arc<ArcSwap<LimitsConfig>>,
}

impl SharedLimits {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(limits)),
        }
    }

    /// Snapshot of the limits in effect.
    pub fn load(&self) -> Arc<LimitsConfig> {
        self.current.load_full()
    }

    /// Replace the limits; in-flight decisions keep the snapshot they read.
    pub fn store(&self, limits: LimitsConfig) {
        self.current.store(Arc::new(limits));
    }

    pub fn max_concurrent_requests(&self) -> Limit<i64> {
        let current = Arc::clone(&self.current);
        Limit::dynamic(move || current.load().max_concurrent_requests)
    }

    pub fn max_query_string_length(&self) -> Limit<i64> {
        let current = Arc::clone(&self.current);
        Limit::per_request(move |ctx: &RequestContext| {
            current.load().query_string_length_for(ctx.path())
        })
    }

    pub fn max_bandwidth(&self) -> Limit<i64> {
        let current = Arc::clone(&self.current);
        Limit::per_request(move |ctx: &RequestContext| current.load().bandwidth_for(ctx.path()))
    }

    pub fn connection_timeout(&self) -> Limit<Duration> {
        let current = Arc::clone(&self.current);
        Limit::dynamic(move || current.load().connection_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteLimits;

    #[test]
    fn accessors_follow_store() {
        let shared = SharedLimits::new(LimitsConfig {
            max_concurrent_requests: 10,
            ..Default::default()
        });
        let limit = shared.max_concurrent_requests();
        let ctx = RequestContext::default();
        assert_eq!(limit.get(&ctx), 10);

        shared.store(LimitsConfig {
            max_concurrent_requests: 2,
            connection_timeout_ms: 1500,
            ..Default::default()
        });
        assert_eq!(limit.get(&ctx), 2);
        assert_eq!(shared.connection_timeout().get(&ctx), Duration::from_millis(1500));
    }

    #[test]
    fn bandwidth_uses_route_override() {
        let shared = SharedLimits::new(LimitsConfig {
            max_bandwidth_bytes_per_second: 5000,
            routes: vec![RouteLimits {
                path_prefix: "/slow".into(),
                max_bandwidth_bytes_per_second: Some(10),
                max_query_string_length: None,
            }],
            ..Default::default()
        });
        let limit = shared.max_bandwidth();

        let slow = axum::http::Request::builder().uri("/slow/file").body(()).unwrap();
        assert_eq!(limit.get(&RequestContext::new(&slow)), 10);
        assert_eq!(limit.get(&RequestContext::default()), 5000);
    }
}
