//! Request-pipeline guards for HTTP servers
//!
//! Tower layers that protect a service from resource exhaustion: admission
//! control on in-flight requests (503), bandwidth throttling of response
//! bodies, a query-string length check (414) and an idle-connection watchdog.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod limits;
pub mod net;
pub mod observability;

pub use config::{GuardConfig, SharedLimits};
pub use http::{GuardStack, HttpServer};
pub use lifecycle::Shutdown;
pub use limits::Limit;
