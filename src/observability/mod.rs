//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guards produce:
//!     → tracing events (admissions, rejections, throttle waits, idle aborts)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
