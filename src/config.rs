//! # Configuration Management
//!
//! Centralized configuration for the bridge server and the remote channel
//! client.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - `EUICC_BRIDGE_*` environment overrides via `apply_env()`
//!
//! The binary layers command-line flags on top of these.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::error::{BridgeError, Result};
use crate::utils::compression::CompressionKind;

/// Current wire format version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes opening every frame ("EUBR")
pub const MAGIC_BYTES: [u8; 4] = [0x45, 0x55, 0x42, 0x52];

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_PAYLOAD_SIZE: usize = 65_507;

/// Default receive buffer size for both ends
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Default idle timeout after which a session may be evicted
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of the idle-session reaper
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Default time a client waits for a response datagram
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bodies shorter than this are sent uncompressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 128;

/// Main configuration structure containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Override fields from `EUICC_BRIDGE_*` environment variables.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse::<T>()
                .map_err(|_| BridgeError::Config(format!("Invalid value for {key}: '{value}'")))
        }

        if let Some(addr) = lookup("EUICC_BRIDGE_BIND_ADDR") {
            self.server.bind_address = addr;
        }
        if let Some(port) = lookup("EUICC_BRIDGE_BIND_PORT") {
            self.server.bind_port = parse("EUICC_BRIDGE_BIND_PORT", &port)?;
        }
        if let Some(size) = lookup("EUICC_BRIDGE_BUFFER_SIZE") {
            self.server.buffer_size = parse("EUICC_BRIDGE_BUFFER_SIZE", &size)?;
        }
        if let Some(secs) = lookup("EUICC_BRIDGE_TIMEOUT_SECS") {
            self.server.session_timeout =
                Duration::from_secs(parse("EUICC_BRIDGE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(server) = lookup("EUICC_BRIDGE_SERVER") {
            self.client.server_address = server;
        }
        if let Some(level) = lookup("EUICC_BRIDGE_LOG_LEVEL") {
            self.logging.log_level = parse("EUICC_BRIDGE_LOG_LEVEL", &level)?;
        }
        Ok(())
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, content)
            .map_err(|e| BridgeError::Config(format!("Failed to write config file: {e}")))
    }

    /// Validate the configuration.
    ///
    /// Returns a list of problems. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// IP address to bind, e.g. "0.0.0.0"
    pub bind_address: String,

    pub bind_port: u16,

    /// Size of the datagram receive buffer in bytes
    pub buffer_size: usize,

    /// Idle time after which the active session is evicted
    #[serde(with = "duration_serde")]
    pub session_timeout: Duration,

    /// Period of the background idle-session reaper
    #[serde(with = "duration_serde")]
    pub reaper_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            bind_port: 8080,
            buffer_size: DEFAULT_BUFFER_SIZE,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Resolve the bind address and port into a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = self.bind_address.parse::<std::net::IpAddr>().map_err(|_| {
            BridgeError::Config(format!("Invalid bind address: '{}'", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.bind_port))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.buffer_size < 64 {
            errors.push("Buffer size too small (minimum: 64 bytes)".to_string());
        } else if self.buffer_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Buffer size too large: {} (maximum: {MAX_PAYLOAD_SIZE})",
                self.buffer_size
            ));
        }

        if self.session_timeout.as_millis() < 100 {
            errors.push("Session timeout too short (minimum: 100ms)".to_string());
        }

        if self.reaper_interval.as_millis() < 10 {
            errors.push("Reaper interval too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Bridge server address, "host:port"
    pub server_address: String,

    /// Size of the response receive buffer in bytes
    pub buffer_size: usize,

    /// How long a call waits for its response datagram
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: String::from("127.0.0.1:8080"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Client server address cannot be empty".to_string());
        }

        if self.buffer_size == 0 || self.buffer_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Client buffer size out of range: {} (1-{MAX_PAYLOAD_SIZE})",
                self.buffer_size
            ));
        }

        if self.response_timeout.as_millis() < 10 {
            errors.push("Response timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Wire codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub compression_enabled: bool,

    pub compression_kind: CompressionKind,

    /// Minimum body size (bytes) before compression is attempted
    pub compression_threshold_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            compression_kind: CompressionKind::Lz4,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.compression_enabled && self.compression_threshold_bytes > MAX_PAYLOAD_SIZE {
            errors.push(
                "Compression threshold cannot be larger than max payload size".to_string(),
            );
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
        }
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
