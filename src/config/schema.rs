//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener, deployment mode and proxy trust.
    pub server: ServerConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Hardening response headers.
    pub security: SecurityConfig,

    /// Per-client request ceiling.
    pub rate_limit: RateLimitConfig,

    /// Request body parsing.
    pub body: BodyConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// Static assets and view templates.
    pub assets: AssetConfig,

    /// Sub-pipelines mounted by path prefix, checked in order.
    pub mounts: Vec<MountConfig>,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cors: CorsConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            body: BodyConfig::default(),
            compression: CompressionConfig::default(),
            assets: AssetConfig::default(),
            mounts: vec![
                MountConfig {
                    name: "user".to_string(),
                    prefix: "/api/v1/user".to_string(),
                    upstream: "127.0.0.1:4001".to_string(),
                },
                MountConfig {
                    name: "stand".to_string(),
                    prefix: "/api/v1/stand".to_string(),
                    upstream: "127.0.0.1:4002".to_string(),
                },
            ],
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Deployment mode. Development enables the request logger.
    pub environment: Environment,

    /// Honour `X-Forwarded-*` headers from a fronting proxy.
    pub trust_proxy: bool,

    /// Total time allowed per request in seconds.
    pub request_timeout_secs: u64,

    /// Time allowed for a sub-pipeline call in seconds.
    pub upstream_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            environment: Environment::Production,
            trust_proxy: true,
            request_timeout_secs: 30,
            upstream_timeout_secs: 15,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. `"*"` allows every origin.
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_secs: None,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { enable_headers: true }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Only paths under this prefix are limited.
    pub path_prefix: String,

    /// Maximum requests per client per window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Message returned when the ceiling is exceeded.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_prefix: "/api".to_string(),
            max_requests: 100,
            window_secs: 60 * 60,
            message: "Too many request from this IP. Please try again in an hour.".to_string(),
        }
    }
}

/// Body parsing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum JSON body size in bytes.
    pub limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 10 * 1024, // 10KB
        }
    }
}

/// Compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Enable response compression.
    pub enabled: bool,

    /// Bodies smaller than this are sent as-is.
    pub threshold_bytes: usize,

    /// Bodies larger than this are streamed uncompressed.
    pub max_buffer_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024,
            max_buffer_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Static files and view templates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory served verbatim. Disabled when unset or missing.
    pub static_dir: Option<String>,

    /// Directory holding `<name>.html` templates.
    pub views_dir: Option<String>,

    /// Template rendered for `GET /`.
    pub root_view: String,

    /// Title passed to the root view.
    pub title: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            static_dir: Some("public".to_string()),
            views_dir: Some("views".to_string()),
            root_view: "base".to_string(),
            title: "Stand".to_string(),
        }
    }
}

/// A sub-pipeline mounted at a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MountConfig {
    /// Identifier for logging.
    pub name: String,

    /// Path prefix (e.g., "/api/v1/user").
    pub prefix: String,

    /// Upstream address (e.g., "127.0.0.1:4001").
    pub upstream: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
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
