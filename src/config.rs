//! # Configuration Management
//!
//! Centralized configuration for publishers and replicas.
//!
//! This module provides structured configuration for listening and connecting
//! endpoints, frame limits, timeouts and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Addresses
//! Endpoints are URLs whose scheme selects the transport:
//! `local:<endpoint>` for local-domain sockets, `tcp://host:port` for network sockets.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;
use url::Url;

/// Protocol version carried by the handshake packet
pub const PROTOCOL_VERSION: &str = "1";

/// Max allowed frame size (e.g. 16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Scheme selecting the local-domain transport
pub const LOCAL_SCHEME: &str = "local";

/// Scheme selecting the network stream transport
pub const TCP_SCHEME: &str = "tcp";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Listening side configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Connecting side configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REMOTE_OBJECTS_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("REMOTE_OBJECTS_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(timeout) = std::env::var("REMOTE_OBJECTS_RESPONSE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.response_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(heartbeat) = std::env::var("REMOTE_OBJECTS_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = heartbeat.parse::<u64>() {
                config.client.heartbeat_interval = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("REMOTE_OBJECTS_MAX_PAYLOAD_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.transport.max_payload_size = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_endpoint(address: &str) -> Result<Url> {
    Url::parse(address).map_err(|e| ProtocolError::InvalidAddress(format!("{address}: {e}")))
}

/// Check an endpoint URL, pushing problems onto `errors`
fn validate_address(label: &str, address: &str, errors: &mut Vec<String>) {
    if address.is_empty() {
        errors.push(format!("{label} address cannot be empty"));
        return;
    }

    let url = match Url::parse(address) {
        Ok(url) => url,
        Err(e) => {
            errors.push(format!(
                "Invalid {} address '{address}': {e} (expected 'local:name' or 'tcp://host:port')",
                label.to_lowercase()
            ));
            return;
        }
    };

    match url.scheme() {
        LOCAL_SCHEME => {}
        TCP_SCHEME => {
            if url.host_str().map_or(true, str::is_empty) {
                errors.push(format!("{label} tcp address '{address}' has no host"));
            }
            if url.port().is_none() {
                errors.push(format!("{label} tcp address '{address}' has no port"));
            }
        }
        other => errors.push(format!(
            "Unknown scheme '{other}' in {} address (expected '{LOCAL_SCHEME}' or '{TCP_SCHEME}')",
            label.to_lowercase()
        )),
    }
}

/// Listening side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "local:replica" or "tcp://127.0.0.1:9000")
    pub address: String,

    /// Maximum number of accepted connections waiting to be picked up
    pub max_pending_connections: usize,

    /// Timeout for graceful listener shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("tcp://127.0.0.1:9000"),
            max_pending_connections: 32,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// The listen address as a URL
    pub fn url(&self) -> Result<Url> {
        parse_endpoint(&self.address)
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Server", &self.address, &mut errors);

        if self.max_pending_connections == 0 {
            errors.push("Max pending connections must be greater than 0".to_string());
        } else if self.max_pending_connections > 100_000 {
            errors.push(format!(
                "Max pending connections very high: {} (maximum recommended: 100,000)",
                self.max_pending_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Connecting side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// How long a caller waits for an invocation reply
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Interval between liveness pings
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("tcp://127.0.0.1:9000"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: timeout::RESPONSE_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// The target address as a URL
    pub fn url(&self) -> Result<Url> {
        parse_endpoint(&self.address)
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Client", &self.address, &mut errors);

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Maximum allowed frame size in bytes
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_payload_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("remote-objects"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
