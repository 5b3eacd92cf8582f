//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//! - Reject route overrides that could never match
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, on startup and reload

use std::net::SocketAddr;

use crate::config::schema::GuardConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} `{value}`: expected host:port")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than zero")]
    NoConnections,

    #[error("limits.routes[{index}].path_prefix `{prefix}` must start with `/`")]
    InvalidPathPrefix { index: usize, prefix: String },

    #[error("limits.routes[{index}] overrides no limit")]
    EmptyRoute { index: usize },

    #[error("app.root must not be empty")]
    EmptyRoot,
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    for (index, route) in config.limits.routes.iter().enumerate() {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix {
                index,
                prefix: route.path_prefix.clone(),
            });
        }
        if route.max_bandwidth_bytes_per_second.is_none() && route.max_query_string_length.is_none() {
            errors.push(ValidationError::EmptyRoute { index });
        }
    }

    if config.app.root.trim().is_empty() {
        errors.push(ValidationError::EmptyRoot);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteLimits;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GuardConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GuardConfig::default();
        config.listener.bind_address = "not an address".into();
        config.listener.max_connections = 0;
        config.limits.routes.push(RouteLimits {
            path_prefix: "downloads".into(),
            ..Default::default()
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NoConnections));
        assert!(errors.contains(&ValidationError::EmptyRoute { index: 0 }));
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = GuardConfig::default();
        config.observability.metrics_address = "nope".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
