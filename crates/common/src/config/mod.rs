//! Configuration management for DataChat services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Per-tenant storage configuration
    pub storage: StorageConfig,

    /// Session lifecycle configuration
    pub session: SessionConfig,

    /// Resource cache configuration
    pub cache: CacheConfig,

    /// Agent collaborator configuration
    pub agent: AgentConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding one database file per tenant
    #[serde(default = "default_storage_root")]
    pub root_dir: PathBuf,

    /// Read-only connections per tenant database
    #[serde(default = "default_max_read_connections")]
    pub max_read_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Interval of the background expiry sweep (0 disables it)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Conversation messages retained per session
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// How long a request waits on an in-flight resource build
    #[serde(default = "default_build_wait_timeout")]
    pub build_wait_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Agent provider: rules, remote
    #[serde(default = "default_agent_provider")]
    pub provider: String,

    /// Planner endpoint for the remote provider
    pub endpoint: Option<String>,

    /// API key for the remote planner
    pub api_key: Option<String>,

    /// Model name forwarded to the remote planner
    #[serde(default = "default_agent_model")]
    pub model: String,

    /// Timeout of a single agent turn in seconds
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,

    /// Rows returned to the client per query
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }
fn default_storage_root() -> PathBuf { PathBuf::from("user_databases") }
fn default_max_read_connections() -> u32 { 4 }
fn default_idle_timeout() -> u64 { 24 * 60 * 60 }
fn default_sweep_interval() -> u64 { 60 }
fn default_max_history() -> usize { 50 }
fn default_build_wait_timeout() -> u64 { 30 }
fn default_agent_provider() -> String { "rules".to_string() }
fn default_agent_model() -> String { "gpt-4o-mini".to_string() }
fn default_agent_timeout() -> u64 { 45 }
fn default_max_result_rows() -> usize { 100 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "datachat".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from defaults, files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&AppConfig::default())?)

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SESSION__IDLE_TIMEOUT_SECS=600
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file layered over the defaults
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Idle threshold for session eviction
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.idle_timeout_secs)
    }

    /// Period of the background expiry sweep, if enabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.session.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// How long callers wait on an in-flight resource build
    pub fn build_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.cache.build_wait_timeout_secs)
    }

    /// Timeout of one agent turn
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                max_upload_bytes: default_max_upload_bytes(),
            },
            storage: StorageConfig {
                root_dir: default_storage_root(),
                max_read_connections: default_max_read_connections(),
            },
            session: SessionConfig {
                idle_timeout_secs: default_idle_timeout(),
                sweep_interval_secs: default_sweep_interval(),
                max_history_messages: default_max_history(),
            },
            cache: CacheConfig {
                build_wait_timeout_secs: default_build_wait_timeout(),
            },
            agent: AgentConfig {
                provider: default_agent_provider(),
                endpoint: None,
                api_key: None,
                model: default_agent_model(),
                timeout_secs: default_agent_timeout(),
                max_result_rows: default_max_result_rows(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.agent.provider, "rules");
        assert_eq!(config.idle_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_sweep_can_be_disabled() {
        let mut config = AppConfig::default();
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));
        config.session.sweep_interval_secs = 0;
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datachat.toml");
        std::fs::write(
            &path,
            "[session]\nidle_timeout_secs = 120\n\n[storage]\nroot_dir = \"/tmp/tenants\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.session.idle_timeout_secs, 120);
        assert_eq!(config.storage.root_dir, PathBuf::from("/tmp/tenants"));
        // untouched sections keep their defaults
        assert_eq!(config.session.max_history_messages, 50);
        assert_eq!(config.server.port, 8000);
    }
}
