//! Request pipeline guards.
//!
//! # Data Flow
//! ```text
//! Incoming exchange:
//!     → concurrency.rs (admit or 503, permit held until the body ends)
//!     → query_string.rs (decoded length check, 414 when too long)
//!     → idle_timeout.rs (watchdog over request reads / response writes)
//!     → bandwidth.rs (swap response body for a paced one)
//!     → application
//! ```
//!
//! Each guard is a `tower::Layer` built around a [`Limit`] accessor. Guards
//! are unaware of each other; the host picks their order.
//!
//! # Design Decisions
//! - Limits are read on every decision, never cached across requests
//! - Rejections are answered in place and never surface as errors
//! - Inner errors pass through untouched after cleanup

pub mod accessor;
pub mod bandwidth;
pub mod concurrency;
pub mod context;
pub mod idle_timeout;
pub mod query_string;
pub mod rate_gate;
mod response;

pub use accessor::Limit;
pub use bandwidth::{Global, MaxBandwidth, MaxBandwidthLayer, PerRequest, ThrottleScope, ThrottledBody};
pub use concurrency::{Admission, AdmissionController, InFlightPermit, MaxConcurrentRequests, MaxConcurrentRequestsLayer};
pub use context::RequestContext;
pub use idle_timeout::{ConnectionTimeout, ConnectionTimeoutLayer, IdleTimeout};
pub use query_string::{MaxQueryStringLength, MaxQueryStringLengthLayer};
pub use rate_gate::RateGate;
