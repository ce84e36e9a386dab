//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{AppConfig, Environment};
use crate::config::validation::{validate_config, ValidationError};

/// Deployment mode override.
pub const ENV_APP_ENV: &str = "APP_ENV";
/// Listener port override.
pub const ENV_PORT: &str = "PORT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid {name}: {message}")]
    Env { name: &'static str, message: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Resolve the effective configuration: file (or defaults), then process
/// environment overrides, then validation.
pub fn resolve_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => AppConfig::default(),
    };

    let config = apply_env_overrides(config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `APP_ENV` and `PORT` from the given lookup.
pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_APP_ENV) {
        config.server.environment = raw
            .parse::<Environment>()
            .map_err(|message| ConfigError::Env { name: ENV_APP_ENV, message })?;
    }

    if let Some(raw) = lookup(ENV_PORT) {
        let port: u16 = raw.trim().parse().map_err(|_| ConfigError::Env {
            name: ENV_PORT,
            message: format!("'{}' is not a port number", raw),
        })?;
        let host = config
            .server
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind_address = format!("{}:{}", host, port);
    }

    Ok(config)
}
