//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, windows within 1s..=30 days)
//! - Check mount prefixes and upstream addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::uri::Authority;
use std::collections::HashSet;

use crate::config::schema::AppConfig;

/// Longest accepted rate-limit window: 30 days.
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("server.bind_address", "must not be empty"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if config.server.upstream_timeout_secs == 0 {
        errors.push(ValidationError::new("server.upstream_timeout_secs", "must be greater than 0"));
    }

    if config.body.limit_bytes == 0 {
        errors.push(ValidationError::new("body.limit_bytes", "must be greater than 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
        }
        if config.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
        } else if config.rate_limit.window_secs > MAX_WINDOW_SECS {
            errors.push(ValidationError::new(
                "rate_limit.window_secs",
                format!("must not exceed {} seconds", MAX_WINDOW_SECS),
            ));
        }
        if !config.rate_limit.path_prefix.starts_with('/') {
            errors.push(ValidationError::new("rate_limit.path_prefix", "must start with '/'"));
        }
    }

    if config.cors.allowed_origins.is_empty() {
        errors.push(ValidationError::new("cors.allowed_origins", "must list at least one origin or \"*\""));
    }

    if config.compression.enabled && config.compression.max_buffer_bytes < config.compression.threshold_bytes {
        errors.push(ValidationError::new(
            "compression.max_buffer_bytes",
            "must not be smaller than threshold_bytes",
        ));
    }

    let mut seen = HashSet::new();
    for (i, mount) in config.mounts.iter().enumerate() {
        let field = format!("mounts[{}]", i);
        if !mount.prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.prefix", field), "must start with '/'"));
        }
        if mount.prefix.trim_end_matches('/').is_empty() {
            errors.push(ValidationError::new(format!("{}.prefix", field), "must not be the root path"));
        }
        if !seen.insert(mount.prefix.trim_end_matches('/').to_ascii_lowercase()) {
            errors.push(ValidationError::new(
                format!("{}.prefix", field),
                format!("duplicate prefix '{}'", mount.prefix),
            ));
        }
        if mount.upstream.parse::<Authority>().is_err() {
            errors.push(ValidationError::new(
                format!("{}.upstream", field),
                format!("'{}' is not a host:port address", mount.upstream),
            ));
        }
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
    use crate::config::schema::MountConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = AppConfig::default();
        config.body.limit_bytes = 0;
        config.rate_limit.window_secs = 0;
        config.rate_limit.path_prefix = "api".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "body.limit_bytes"));
    }

    #[test]
    fn test_window_upper_bound() {
        let mut config = AppConfig::default();
        config.rate_limit.window_secs = u64::MAX;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "rate_limit.window_secs");

        config.rate_limit.window_secs = MAX_WINDOW_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_disabled_limiter_is_not_checked() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_requests = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_mounts() {
        let mut config = AppConfig::default();
        config.mounts = vec![
            MountConfig { name: "a".into(), prefix: "/api/v1/user".into(), upstream: "127.0.0.1:1".into() },
            MountConfig { name: "b".into(), prefix: "/API/v1/user/".into(), upstream: "127.0.0.1:2".into() },
            MountConfig { name: "c".into(), prefix: "/".into(), upstream: "not an address".into() },
        ];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"mounts[1].prefix"));
        assert!(fields.contains(&"mounts[2].prefix"));
        assert!(fields.contains(&"mounts[2].upstream"));
    }
}
