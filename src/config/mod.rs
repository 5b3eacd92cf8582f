//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated)
//!     → [limits] section stored in shared.rs (SharedLimits)
//!     → guards read it through Limit accessors on every decision
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the limits in SharedLimits
//!     → next request observes the new limits
//! ```
//!
//! # Design Decisions
//! - Only `[limits]` is hot-reloaded; listener and app changes need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod shared;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, BandwidthScope, GuardConfig, LimitsConfig, ListenerConfig, ObservabilityConfig,
    RouteLimits,
};
pub use shared::SharedLimits;
pub use watcher::ConfigWatcher;
