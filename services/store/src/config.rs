use crate::configuration_resolver::FingerprintPolicy;
use crate::dispatcher::MAX_CONCURRENCY;
use crate::error::ConfigurationError;
use serde::Deserialize;

/// Main configuration for the store service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Document store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Configuration fingerprint policy
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    /// Event ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Redis event queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Which document store implementation to connect
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Mongodb,
    /// In-process store, nothing persists past exit
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend implementation
    #[serde(default)]
    pub backend: BackendKind,
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    #[serde(default = "default_database_name")]
    pub name: String,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
    /// Authentication database
    pub auth_source: Option<String>,
    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,
    /// Application name reported to the server
    #[serde(default = "default_service_name")]
    pub app_name: String,
    /// Connection and server selection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
}

/// Which fields never take part in a configuration's identity
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FingerprintConfig {
    /// Versioned ignored-field set
    #[serde(default)]
    pub policy: FingerprintPolicy,
    /// Explicit ignored fields, replacing the policy's set when present
    pub ignored_fields: Option<Vec<String>>,
}

/// Where events are read from
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    /// Redis lists filled by the request layer
    #[default]
    Redis,
    /// One JSON envelope per line on stdin
    Stdin,
}

/// Event ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Event source
    #[serde(default)]
    pub source: IngestSource,
    /// Maximum events recorded concurrently
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
}

/// Redis event queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_queue_port")]
    pub port: u16,
    /// Password, empty for none
    pub password: Option<String>,
    /// Logical database
    #[serde(default)]
    pub db: i64,
    /// List holding queued activations
    #[serde(default = "default_activation_list")]
    pub activation_list: String,
    /// List holding queued pings
    #[serde(default = "default_ping_list")]
    pub ping_list: String,
    /// Seconds a blocking pop waits before polling again
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "activation-store".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    27017
}

fn default_database_name() -> String {
    "eos-activation-service".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_ingest_concurrency() -> usize {
    16
}

fn default_queue_port() -> u16 {
    6379
}

fn default_activation_list() -> String {
    "activation-v1".to_string()
}

fn default_ping_list() -> String {
    "ping-v1".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/store").required(false))
            .add_source(config::File::with_name("/etc/eos/store").required(false))
            // Override with environment variables
            // STORE__DATABASE__HOST -> database.host
            .add_source(
                config::Environment::with_prefix("STORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent values before anything connects
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.password.is_some() && self.database.username.is_none() {
            return Err(ConfigurationError::InvalidValue {
                key: "database.password".to_string(),
                message: "password given without database.username".to_string(),
            });
        }

        if self.database.max_pool_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "database.max_pool_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.ingest.concurrency == 0 || self.ingest.concurrency > MAX_CONCURRENCY {
            return Err(ConfigurationError::InvalidValue {
                key: "ingest.concurrency".to_string(),
                message: format!("must be between 1 and {}", MAX_CONCURRENCY),
            });
        }

        if self.queue.activation_list == self.queue.ping_list {
            return Err(ConfigurationError::InvalidValue {
                key: "queue.ping_list".to_string(),
                message: "must differ from queue.activation_list".to_string(),
            });
        }

        if self.queue.poll_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "queue.poll_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            host: default_host(),
            port: default_port(),
            name: default_database_name(),
            username: None,
            password: None,
            auth_source: None,
            tls: false,
            app_name: default_service_name(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: IngestSource::default(),
            concurrency: default_ingest_concurrency(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_queue_port(),
            password: None,
            db: 0,
            activation_list: default_activation_list(),
            ping_list: default_ping_list(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(value: serde_json::Value) -> Config {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_values() {
        let config = from_json(serde_json::json!({}));
        assert_eq!(config.database.backend, BackendKind::Mongodb);
        assert_eq!(config.database.port, 27017);
        assert_eq!(config.database.name, "eos-activation-service");
        assert!(!config.database.tls);
        assert_eq!(config.ingest.concurrency, 16);
        assert_eq!(config.ingest.source, IngestSource::Redis);
        assert_eq!(config.queue.port, 6379);
        assert_eq!(config.queue.activation_list, "activation-v1");
        assert_eq!(config.queue.ping_list, "ping-v1");
        assert_eq!(config.fingerprint.policy, FingerprintPolicy::V2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_backend_and_ignored_fields() {
        let config = from_json(serde_json::json!({
            "database": { "backend": "memory" },
            "fingerprint": { "policy": "v1", "ignored_fields": ["count"] }
        }));

        assert_eq!(config.database.backend, BackendKind::Memory);
        assert_eq!(config.fingerprint.policy, FingerprintPolicy::V1);
        assert_eq!(config.fingerprint.ignored_fields, Some(vec!["count".to_string()]));
    }

    #[test]
    fn test_password_requires_username() {
        let config = from_json(serde_json::json!({
            "database": { "password": "secret" }
        }));

        match config.validate() {
            Err(ConfigurationError::InvalidValue { key, .. }) => {
                assert_eq!(key, "database.password");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = from_json(serde_json::json!({
            "ingest": { "concurrency": 0 }
        }));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_upper_bound() {
        let at_limit = from_json(serde_json::json!({
            "ingest": { "concurrency": MAX_CONCURRENCY }
        }));
        assert!(at_limit.validate().is_ok());

        let over = from_json(serde_json::json!({
            "ingest": { "concurrency": 5_000_000_000u64 }
        }));
        match over.validate() {
            Err(ConfigurationError::InvalidValue { key, .. }) => {
                assert_eq!(key, "ingest.concurrency");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_stdin_source_and_shared_list_rejected() {
        let config = from_json(serde_json::json!({
            "ingest": { "source": "stdin" },
            "queue": { "activation_list": "events", "ping_list": "events" }
        }));

        assert_eq!(config.ingest.source, IngestSource::Stdin);
        assert!(config.validate().is_err());
    }
}
