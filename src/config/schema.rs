//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! every field has a default, so an empty file is a valid configuration
//! with every guard disabled.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, connection backpressure).
    pub listener: ListenerConfig,

    /// Guard limits. Reloaded at runtime when the file changes.
    pub limits: LimitsConfig,

    /// Application served behind the guards.
    pub app: AppConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure on accept).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Which exchanges share a bandwidth budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthScope {
    /// One budget shared by every connection.
    #[default]
    Global,
    /// Every exchange gets the full budget.
    PerRequest,
}

/// Guard limits.
///
/// Integer limits use `0` or a negative value for unlimited. Everything but
/// `bandwidth_scope` takes effect on the next request after a reload; the
/// scope is fixed when the pipeline is built.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum exchanges in flight at once.
    pub max_concurrent_requests: i64,

    /// Maximum percent-decoded query string length, in characters.
    pub max_query_string_length: i64,

    /// Maximum response bytes per second.
    pub max_bandwidth_bytes_per_second: i64,

    /// Whether the bandwidth budget is global or per request.
    pub bandwidth_scope: BandwidthScope,

    /// Idle timeout in milliseconds; `0` disables it.
    pub connection_timeout_ms: u64,

    /// Path-specific overrides; the longest matching prefix wins.
    pub routes: Vec<RouteLimits>,
}

/// Limits that apply to requests under a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteLimits {
    /// Path prefix to match (case-sensitive).
    pub path_prefix: String,

    pub max_bandwidth_bytes_per_second: Option<i64>,

    pub max_query_string_length: Option<i64>,
}

impl LimitsConfig {
    /// Longest-prefix route under `path` that sets the field `pick` reads.
    fn route_value(&self, path: &str, pick: impl Fn(&RouteLimits) -> Option<i64>) -> Option<i64> {
        self.routes
            .iter()
            .filter(|route| path.starts_with(&route.path_prefix))
            .filter_map(|route| pick(route).map(|value| (route.path_prefix.len(), value)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, value)| value)
    }

    pub fn bandwidth_for(&self, path: &str) -> i64 {
        self.route_value(path, |r| r.max_bandwidth_bytes_per_second)
            .unwrap_or(self.max_bandwidth_bytes_per_second)
    }

    pub fn query_string_length_for(&self, path: &str) -> i64 {
        self.route_value(path, |r| r.max_query_string_length)
            .unwrap_or(self.max_query_string_length)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Application served behind the guards by the bundled binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of static files to serve.
    pub root: String,

    /// Log every request through `tower-http`'s trace layer.
    pub trace_requests: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: "public".to_string(),
            trace_requests: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
