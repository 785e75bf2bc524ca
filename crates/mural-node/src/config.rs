//! # Replica Configuration
//!
//! Configuration for one message-server replica, loadable from a YAML file
//! and overridable from environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SERVER_NAME` | Unique replica identifier | `server_1` |
//! | `SYNC_INTERVAL` | Mutations between replication pushes | `10` |
//! | `COORDINATOR_TIMEOUT_SECS` | Heartbeat age that marks the coordinator dead | `15` |
//! | `CLIENT_PORT` | Client (broker-facing) port | `5000` |
//! | `REPLICATION_PORT` | Peer replication port | `6000` |
//! | `ELECTION_PORT` | Peer election port | `6001` |
//! | `DATA_DIR` | Data directory | `./data` |
//! | `REGISTRY_ADDR` | Registry address | `127.0.0.1:7000` |
//! | `PROXY_ADDR` | Publication proxy address (optional) | *unset* |
//! | `ADVERTISE_HOST` | Host peers use to reach this replica | `127.0.0.1` |
//! | `LOG_LEVEL` | Log level | `info` |
//! | `LOG_FORMAT` | Log format (json/pretty) | `pretty` |

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Environment variable parsing error.
    #[error("Failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// The offending variable.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// File loading error.
    #[error("Failed to load configuration file: {0}")]
    FileLoad(String),

    /// Validation error.
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main replica configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReplicaConfig {
    /// Unique replica identifier, registered with the registry.
    pub server_name: String,

    /// Number of locally processed mutations between replication pushes
    /// (and Berkeley cycles on the coordinator).
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Client (broker-facing) bind address.
    #[serde(default = "default_client_addr")]
    pub client_addr: SocketAddr,

    /// Peer replication bind address.
    #[serde(default = "default_replication_addr")]
    pub replication_addr: SocketAddr,

    /// Peer election bind address.
    #[serde(default = "default_election_addr")]
    pub election_addr: SocketAddr,

    /// Host name peers use to reach this replica; combined with the actual
    /// bound ports when registering. In containers this is the service
    /// name, on a single host `127.0.0.1`.
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Data directory for the persisted sequences and journals.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Registry address.
    #[serde(default = "default_registry_addr")]
    pub registry_addr: String,

    /// Publication proxy address; publications are dropped when unset.
    #[serde(default)]
    pub proxy_addr: Option<String>,

    /// Logging configuration.
    #[validate(nested)]
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Protocol timing knobs.
    #[validate(nested)]
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            server_name: "server_1".to_string(),
            sync_interval: default_sync_interval(),
            client_addr: default_client_addr(),
            replication_addr: default_replication_addr(),
            election_addr: default_election_addr(),
            advertise_host: default_advertise_host(),
            data_dir: default_data_dir(),
            registry_addr: default_registry_addr(),
            proxy_addr: None,
            logging: LoggingConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl ReplicaConfig {
    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileLoad(e.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::FileLoad(e.to_string()))
    }

    /// Merge configuration from environment variables.
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(name) = std::env::var("SERVER_NAME") {
            self.server_name = name;
        }
        if let Ok(interval) = std::env::var("SYNC_INTERVAL") {
            self.sync_interval = parse_env("SYNC_INTERVAL", &interval)?;
        }
        if let Ok(timeout) = std::env::var("COORDINATOR_TIMEOUT_SECS") {
            self.timing.coordinator_timeout_secs = parse_env("COORDINATOR_TIMEOUT_SECS", &timeout)?;
        }
        if let Ok(port) = std::env::var("CLIENT_PORT") {
            self.client_addr.set_port(parse_env("CLIENT_PORT", &port)?);
        }
        if let Ok(port) = std::env::var("REPLICATION_PORT") {
            self.replication_addr
                .set_port(parse_env("REPLICATION_PORT", &port)?);
        }
        if let Ok(port) = std::env::var("ELECTION_PORT") {
            self.election_addr
                .set_port(parse_env("ELECTION_PORT", &port)?);
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("REGISTRY_ADDR") {
            self.registry_addr = addr;
        }
        if let Ok(addr) = std::env::var("PROXY_ADDR") {
            self.proxy_addr = Some(addr);
        }
        if let Ok(host) = std::env::var("ADVERTISE_HOST") {
            self.advertise_host = host;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.server_name.is_empty() {
            return Err(ConfigError::Invalid("server_name must not be empty".into()));
        }
        if self.advertise_host.is_empty() {
            return Err(ConfigError::Invalid(
                "advertise_host must not be empty".into(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log format '{}'. Valid values: {:?}",
                self.logging.format, valid_formats
            )));
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (json, pretty).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Protocol timing, in seconds. Production deployments keep the defaults;
/// tests compress them.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TimingConfig {
    /// Heartbeat age after which the coordinator is suspected dead.
    #[validate(range(min = 0.1, max = 3600.0))]
    pub coordinator_timeout_secs: f64,

    /// Deadline for each replication transfer.
    #[validate(range(min = 0.1, max = 60.0))]
    pub replication_timeout_secs: f64,

    /// Deadline for each Berkeley probe or adjustment.
    #[validate(range(min = 0.1, max = 60.0))]
    pub berkeley_timeout_secs: f64,

    /// Deadline for each election RPC.
    #[validate(range(min = 0.1, max = 60.0))]
    pub election_timeout_secs: f64,

    /// How long an outranked candidate waits for the winner's announcement.
    #[validate(range(min = 0.1, max = 120.0))]
    pub announcement_timeout_secs: f64,

    /// Heartbeat period.
    #[validate(range(min = 0.1, max = 60.0))]
    pub heartbeat_secs: f64,

    /// Coordinator-liveness monitor period.
    #[validate(range(min = 0.1, max = 60.0))]
    pub monitor_secs: f64,

    /// Deadline for each registry call.
    #[validate(range(min = 0.1, max = 60.0))]
    pub registry_timeout_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            coordinator_timeout_secs: 15.0,
            replication_timeout_secs: 3.0,
            berkeley_timeout_secs: 2.0,
            election_timeout_secs: 5.0,
            announcement_timeout_secs: 10.0,
            heartbeat_secs: 5.0,
            monitor_secs: 5.0,
            registry_timeout_secs: 3.0,
        }
    }
}

impl TimingConfig {
    /// Replication deadline as a [`Duration`].
    pub fn replication_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.replication_timeout_secs)
    }

    /// Berkeley deadline as a [`Duration`].
    pub fn berkeley_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.berkeley_timeout_secs)
    }

    /// Election deadline as a [`Duration`].
    pub fn election_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.election_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::EnvParse {
        key: key.to_string(),
        message: format!("could not parse {value:?}"),
    })
}

fn default_sync_interval() -> u64 {
    10
}

fn default_client_addr() -> SocketAddr {
    "0.0.0.0:5000".parse().expect("Invalid default address")
}

fn default_replication_addr() -> SocketAddr {
    "0.0.0.0:6000".parse().expect("Invalid default address")
}

fn default_election_addr() -> SocketAddr {
    "0.0.0.0:6001".parse().expect("Invalid default address")
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_registry_addr() -> String {
    "127.0.0.1:7000".to_string()
}
