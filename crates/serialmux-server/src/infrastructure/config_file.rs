//! TOML configuration file.
//!
//! Every key is optional; absent keys take the same defaults as
//! [`ServerConfig::default`].  Example:
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:9994"
//! poll_interval_ms = 10
//! max_line_length = 1024
//!
//! [device]
//! endpoint = "/dev/ttyACM0"     # or "tcp://10.0.0.5:2001"
//! baud_rate = 115200
//! read_timeout_ms = 50
//! max_attempts = 100
//!
//! [log]
//! level = "debug"
//! ```
//!
//! Command-line flags are applied on top of the loaded values in `main.rs`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    ConfigError, DeviceEndpoint, ServerConfig, DEFAULT_BAUD_RATE, DEFAULT_DEVICE_PATH,
    DEFAULT_LISTEN_ADDR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_LINE_LENGTH, DEFAULT_POLL_INTERVAL,
    DEFAULT_READ_TIMEOUT,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parsed but do not form a usable configuration.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level layout of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub log: LogSection,
}

/// Client-facing listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Session poll tick in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Device channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Serial port path, or `tcp://host:port` for a network bridge.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Ignored for `tcp://` endpoints.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}
fn default_endpoint() -> String {
    DEFAULT_DEVICE_PATH.to_string()
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::Parse`] if the TOML is malformed or has unknown
    /// value types.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Converts the file values into a validated [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::Invalid`] for an unparsable address or endpoint, or
    /// a value [`ServerConfig::validate`] rejects.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigFileError> {
        let listen_addr: SocketAddr =
            self.server
                .listen_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress {
                    value: self.server.listen_addr.clone(),
                })?;
        let config = ServerConfig {
            listen_addr,
            device: DeviceEndpoint::parse(&self.device.endpoint, self.device.baud_rate)?,
            poll_interval: Duration::from_millis(self.server.poll_interval_ms),
            read_timeout: Duration::from_millis(self.device.read_timeout_ms),
            max_attempts: self.device.max_attempts,
            max_line_length: self.server.max_line_length,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Loads and parses the config file at `path`.
///
/// Unlike a per-user settings file, an explicitly named config that does not
/// exist is an error.
///
/// # Errors
///
/// [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if the TOML is malformed.
pub fn load(path: &Path) -> Result<FileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
