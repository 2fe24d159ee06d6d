//! Gateway configuration.
//!
//! Static settings that do not change between sessions: where the broker
//! lives, which adapter to scan with, and how hard to try delivering a
//! report. The per-install key-value preferences live in [`crate::store`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use beacon_core::RetryConfig;

use crate::broker::parse_broker_url;

/// Gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub broker: BrokerConfig,
    /// Radio settings.
    pub scan: ScanConfig,
    /// Report delivery policy.
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        write_file(path.as_ref(), &content)
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use beacon_gateway::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.broker.validate());
        errors.extend(self.delivery.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`).
    pub url: String,
    /// Username, if the broker requires one.
    pub username: Option<String>,
    /// Password for `username`.
    pub password: Option<String>,
    /// MQTT client id. Generated per session when absent.
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// How long to wait for the broker to acknowledge the connection.
    pub connect_timeout_secs: u64,
    /// Largest MQTT packet sent or accepted, in KiB.
    pub max_packet_kib: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            max_packet_kib: 256,
        }
    }
}

impl BrokerConfig {
    /// The configured client id, or a fresh `beacon-gw-<uuid>` one.
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("beacon-gw-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Connection acknowledgement timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Packet size limit in bytes.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_kib.saturating_mul(1024)
    }

    /// Validate broker configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = parse_broker_url(&self.url) {
            errors.push(ValidationError {
                field: "broker.url".to_string(),
                message: e.to_string(),
            });
        }

        if self.password.is_some() && self.username.is_none() {
            errors.push(ValidationError {
                field: "broker.password".to_string(),
                message: "password is set but username is missing".to_string(),
            });
        }

        if self.keep_alive_secs > u64::from(u16::MAX) {
            errors.push(ValidationError {
                field: "broker.keep_alive_secs".to_string(),
                message: format!(
                    "keep alive {} exceeds the protocol maximum of {} seconds",
                    self.keep_alive_secs,
                    u16::MAX
                ),
            });
        }

        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "broker.connect_timeout_secs".to_string(),
                message: "connect timeout must be at least 1 second".to_string(),
            });
        }

        if self.max_packet_kib == 0 || self.max_packet_kib > MAX_PACKET_KIB {
            errors.push(ValidationError {
                field: "broker.max_packet_kib".to_string(),
                message: format!(
                    "packet limit {} KiB must be between 1 and {} KiB",
                    self.max_packet_kib, MAX_PACKET_KIB
                ),
            });
        }

        errors
    }
}

/// Largest packet the MQTT remaining-length field can describe, rounded down.
pub const MAX_PACKET_KIB: usize = 256 * 1024 - 1;

/// Radio settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Index of the Bluetooth adapter to scan with.
    pub adapter_index: usize,
}

/// What to do when a report cannot be published.
///
/// The defaults attempt each report once and drop it on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Undelivered reports kept for the next tick (0 disables buffering).
    pub buffer_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            buffer_capacity: 0,
        }
    }
}

/// Largest allowed ring buffer.
pub const MAX_BUFFER_CAPACITY: usize = 1024;

impl DeliveryConfig {
    /// Retry policy for a single report.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
    }

    /// Validate delivery configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.max_delay_ms < self.initial_delay_ms {
            errors.push(ValidationError {
                field: "delivery.max_delay_ms".to_string(),
                message: format!(
                    "max delay {}ms is shorter than initial delay {}ms",
                    self.max_delay_ms, self.initial_delay_ms
                ),
            });
        }

        if self.buffer_capacity > MAX_BUFFER_CAPACITY {
            errors.push(ValidationError {
                field: "delivery.buffer_capacity".to_string(),
                message: format!(
                    "buffer capacity {} is too large (maximum {})",
                    self.buffer_capacity, MAX_BUFFER_CAPACITY
                ),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `broker.url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Directory holding both configuration files.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beacon-gateway")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("gateway.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.broker.url, "mqtt://localhost:1883");
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.scan.adapter_index, 0);
        assert_eq!(config.delivery.max_retries, 0);
        assert_eq!(config.delivery.buffer_capacity, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_client_id() {
        let config = BrokerConfig::default();
        let a = config.client_id();
        let b = config.client_id();
        assert!(a.starts_with("beacon-gw-"));
        assert_ne!(a, b);

        let fixed = BrokerConfig {
            client_id: Some("gw-fixed".into()),
            ..Default::default()
        };
        assert_eq!(fixed.client_id(), "gw-fixed");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [broker]
            url = "mqtts://broker.example.com"
            username = "gw"
            password = "secret"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.url, "mqtts://broker.example.com");
        assert_eq!(config.broker.username.as_deref(), Some("gw"));
        assert_eq!(config.broker.connect_timeout_secs, 10);
        assert_eq!(config.delivery, DeliveryConfig::default());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = Config {
            broker: BrokerConfig {
                url: "http://localhost".into(),
                password: Some("secret".into()),
                connect_timeout_secs: 0,
                max_packet_kib: 0,
                ..Default::default()
            },
            delivery: DeliveryConfig {
                initial_delay_ms: 1000,
                max_delay_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        };

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec![
                        "broker.url",
                        "broker.password",
                        "broker.connect_timeout_secs",
                        "broker.max_packet_kib",
                        "delivery.max_delay_ms",
                    ]
                );
            }
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_packet_limit_fits_large_reports() {
        let broker = BrokerConfig::default();
        assert_eq!(broker.max_packet_size(), 256 * 1024);
        assert!(broker.validate().is_empty());

        let too_big = BrokerConfig {
            max_packet_kib: MAX_PACKET_KIB + 1,
            ..Default::default()
        };
        assert_eq!(too_big.validate()[0].field, "broker.max_packet_kib");
    }

    #[test]
    fn test_retry_config_from_delivery() {
        let delivery = DeliveryConfig {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            buffer_capacity: 4,
        };
        let retry = delivery.retry_config();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_millis(400));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("gateway.toml");

        let config = Config {
            broker: BrokerConfig {
                url: "mqtt://10.0.0.5:1884".into(),
                client_id: Some("gw-1".into()),
                ..Default::default()
            },
            scan: ScanConfig { adapter_index: 1 },
            delivery: DeliveryConfig {
                buffer_capacity: 8,
                ..Default::default()
            },
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/gateway.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("beacon-gateway/gateway.toml"));
    }

    #[test]
    fn test_validation_error_display() {
        let error = ConfigError::Validation(vec![ValidationError {
            field: "broker.url".into(),
            message: "bad".into(),
        }]);
        assert_eq!(
            error.to_string(),
            "Configuration validation failed:\n  - broker.url: bad"
        );
    }
}
