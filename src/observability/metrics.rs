//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_rejections_total` (counter): rejected exchanges by guard
//! - `guard_in_flight_requests` (gauge): exchanges holding an admission permit
//! - `guard_throttle_delay_seconds` (histogram): waits imposed by bandwidth pacing
//! - `guard_idle_timeouts_total` (counter): exchanges aborted for inactivity
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so guards can be used without an exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_rejected(guard: &'static str) {
    metrics::counter!("guard_rejections_total", "guard" => guard).increment(1);
}

pub fn set_in_flight(in_flight: usize) {
    metrics::gauge!("guard_in_flight_requests").set(in_flight as f64);
}

pub fn record_throttle_delay(delay: Duration) {
    metrics::histogram!("guard_throttle_delay_seconds").record(delay.as_secs_f64());
}

pub fn record_idle_timeout() {
    metrics::counter!("guard_idle_timeouts_total").increment(1);
}
