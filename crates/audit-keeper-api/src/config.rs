//! # Service Configuration
//!
//! Every field carries a serde default, so an empty environment produces a
//! runnable single-instance configuration backed by in-memory stores.
//!
//! Sources are layered by [`load_config`], later sources overriding earlier
//! ones:
//!
//! 1. `/etc/audit-keeper/service.yaml`
//! 2. `./config/service.yaml`
//! 3. the file named by `AK_CONFIG_FILE` (required when set)
//! 4. environment variables prefixed `AK__`, e.g. `AK__SERVER__PORT=9090`

use crate::errors::ConfigError;
use audit_keeper_core::{
    ConfirmConfig, FileSinkSettings, ManagementApiConfig, ReplayConfig, RetryPolicy,
    TopologyConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "AK_CONFIG_FILE";

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "AK";

const MIN_FILE_LENGTH_MB: u64 = 10;
const MIN_FILE_AGE_SECONDS: u64 = 60;

// ============================================================================
// Service Configuration
// ============================================================================

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,

    /// Intake acknowledgement and retry behaviour
    pub audit: AuditConfig,

    pub broker: BrokerConfig,

    /// Desired topology, hysteresis, poll intervals and recovery flags
    pub health: TopologyConfig,

    pub replay: ReplayConfig,
    pub status_store: StatusStoreConfig,

    /// Fallback sink used when the broker cannot be reached
    pub file_sink: FileSinkConfig,

    /// Consumer side sink writing delivered audits to files
    pub dump: FileSinkConfig,

    /// Consumer side sink writing delivered audits to the log
    pub log_sink: LogSinkConfig,

    pub cluster: ClusterConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            audit: AuditConfig::default(),
            broker: BrokerConfig::default(),
            health: TopologyConfig::default(),
            replay: ReplayConfig::default(),
            status_store: StatusStoreConfig::default(),
            file_sink: FileSinkConfig::default(),
            dump: FileSinkConfig {
                enabled: false,
                path: PathBuf::from("data/audit-dump"),
                prefix: "dump".to_string(),
                ..FileSinkConfig::default()
            },
            log_sink: LogSinkConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_sink.enabled {
            self.file_sink.validate("file_sink")?;
        }
        if self.dump.enabled {
            self.dump.validate("dump")?;
        }

        if self.replay.worker_pool_size < 1 {
            return Err(invalid("replay.worker_pool_size", "must be at least 1"));
        }
        if self.replay.flush_interval_lines < 1 {
            return Err(invalid("replay.flush_interval_lines", "must be at least 1"));
        }
        if self.replay.sweep_interval.is_zero() {
            return Err(invalid("replay.sweep_interval", "must be greater than zero"));
        }

        if self.health.healthy_poll_interval.is_zero() {
            return Err(invalid(
                "health.healthy_poll_interval",
                "must be greater than zero",
            ));
        }
        if self.health.unhealthy_poll_interval.is_zero() {
            return Err(invalid(
                "health.unhealthy_poll_interval",
                "must be greater than zero",
            ));
        }

        if self.audit.retry.max_attempts < 1 {
            return Err(invalid("audit.retry.max_attempts", "must be at least 1"));
        }

        if self.status_store.backend == StatusStoreBackend::Filesystem
            && self.status_store.directory.as_os_str().is_empty()
        {
            return Err(invalid(
                "status_store.directory",
                "is required for the filesystem backend",
            ));
        }

        if self.server.port == 0 {
            return Err(invalid("server.port", "must not be 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Load configuration from the standard file locations and the environment
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/audit-keeper/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Ok(explicit_path) = std::env::var(CONFIG_FILE_ENV) {
        if !explicit_path.is_empty() {
            info!(path = %explicit_path, "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::with_name(&explicit_path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }
    }

    let service_config: ServiceConfig = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()?;

    Ok(service_config)
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Time allowed for in-flight requests and replay workers on shutdown
    pub shutdown_timeout_seconds: u64,

    pub enable_cors: bool,
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON structured logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Intake settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub confirm: ConfirmConfig,
    pub retry: RetryPolicy,
}

/// How audit messages reach the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// In-process transport feeding the local consumers
    #[default]
    Memory,
    /// Publish through the broker management HTTP API
    ManagementApi,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub transport: TransportMode,
    pub management: ManagementApiConfig,

    /// Exchange audits are published to
    pub exchange: String,
    pub routing_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            management: ManagementApiConfig::default(),
            exchange: "audit".to_string(),
            routing_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStoreBackend {
    #[default]
    Memory,
    Filesystem,
}

/// Where replay status documents live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusStoreConfig {
    pub backend: StatusStoreBackend,

    /// Directory for the filesystem backend
    pub directory: PathBuf,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            backend: StatusStoreBackend::default(),
            directory: PathBuf::from("data/replay-status"),
        }
    }
}

/// Rotating JSON-lines file sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub sub_path: Option<String>,
    pub prefix: String,
    pub max_file_length_mb: u64,
    pub max_file_age_seconds: u64,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("data/audit-fallback"),
            sub_path: None,
            prefix: "audit".to_string(),
            max_file_length_mb: 20,
            max_file_age_seconds: 3600,
        }
    }
}

impl FileSinkConfig {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_file_length_mb < MIN_FILE_LENGTH_MB {
            return Err(invalid(
                &format!("{}.max_file_length_mb", section),
                &format!("must be at least {}", MIN_FILE_LENGTH_MB),
            ));
        }
        if self.max_file_age_seconds < MIN_FILE_AGE_SECONDS {
            return Err(invalid(
                &format!("{}.max_file_age_seconds", section),
                &format!("must be at least {}", MIN_FILE_AGE_SECONDS),
            ));
        }
        if self.prefix.is_empty() || self.prefix.starts_with('.') {
            return Err(invalid(
                &format!("{}.prefix", section),
                "must be non-empty and must not start with '.'",
            ));
        }
        Ok(())
    }

    pub fn to_settings(&self) -> FileSinkSettings {
        let mut settings = FileSinkSettings::new(self.path.clone())
            .with_prefix(self.prefix.clone())
            .with_max_file_bytes(self.max_file_length_mb * 1024 * 1024)
            .with_max_file_age(Duration::from_secs(self.max_file_age_seconds));
        if let Some(sub_path) = &self.sub_path {
            settings = settings.with_sub_path(sub_path.clone());
        }
        settings
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub enabled: bool,
}

/// Peers that receive replay stop and update commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URLs of the other service instances
    pub peers: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            request_timeout_ms: 2000,
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
