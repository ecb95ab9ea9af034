//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for runtime settings.  It
//! is built once at startup (defaults, then the TOML file, then CLI flags)
//! and shared with every task behind an `Arc`.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default TCP address clients connect to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9994";
/// Default serial device path.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// How long a session waits for client bytes before checking its mailbox.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long one device read waits for a line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Device reads allowed while waiting for a reply.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Scheme prefix selecting a TCP serial bridge instead of a local port.
const TCP_SCHEME: &str = "tcp://";

/// Errors produced while building or validating a [`ServerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A socket address string could not be parsed.
    #[error("invalid address '{value}'")]
    InvalidAddress { value: String },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where the device is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEndpoint {
    /// A local serial port, e.g. `/dev/ttyUSB0` or `COM12`.
    Serial { path: String, baud_rate: u32 },
    /// A network serial bridge such as `ser2net`, written `tcp://ip:port`.
    Tcp(SocketAddr),
}

impl DeviceEndpoint {
    /// Parses an endpoint string.  `tcp://` selects a bridge; anything else is
    /// a serial port path opened at `baud_rate`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] for a malformed `tcp://` address and
    /// [`ConfigError::Invalid`] for an empty path.
    pub fn parse(value: &str, baud_rate: u32) -> Result<Self, ConfigError> {
        let value = value.trim();
        if let Some(addr) = value.strip_prefix(TCP_SCHEME) {
            let addr = SocketAddr::from_str(addr).map_err(|_| ConfigError::InvalidAddress {
                value: addr.to_string(),
            })?;
            return Ok(DeviceEndpoint::Tcp(addr));
        }
        if value.is_empty() {
            return Err(ConfigError::Invalid("device path is empty".to_string()));
        }
        Ok(DeviceEndpoint::Serial {
            path: value.to_string(),
            baud_rate,
        })
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEndpoint::Serial { path, baud_rate } => write!(f, "{path}@{baud_rate}"),
            DeviceEndpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
        }
    }
}

/// All runtime configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the client listener binds to.
    ///
    /// Defaults to loopback: the protocol has no authentication, so exposing
    /// it on a LAN is an explicit choice.
    pub listen_addr: SocketAddr,

    /// The device the engine talks to.
    pub device: DeviceEndpoint,

    /// Session poll tick: upper bound on reply delivery latency once a reply
    /// sits in a mailbox.
    pub poll_interval: Duration,

    /// One device read waits at most this long.  Also the engine's idle tick.
    pub read_timeout: Duration,

    /// Device reads spent waiting for one reply before the client gets the
    /// timeout sentinel.  Blank, comment and unrelated lines all count.
    pub max_attempts: u32,

    /// Longest line buffered from a client or the device; longer lines are
    /// discarded.
    pub max_line_length: usize,
}

impl ServerConfig {
    /// Checks ranges that would otherwise hang or spin the engine.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Invalid("read_timeout must be non-zero".to_string()));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid("max_line_length must be non-zero".to_string()));
        }
        if let DeviceEndpoint::Serial { baud_rate: 0, .. } = self.device {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Worst case between a command being written and its timeout sentinel.
    pub fn reply_deadline(&self) -> Duration {
        self.read_timeout.saturating_mul(self.max_attempts)
    }
}

impl Default for ServerConfig {
    /// | Field           | Default             |
    /// |-----------------|---------------------|
    /// | listen_addr     | `127.0.0.1:9994`    |
    /// | device          | `/dev/ttyUSB0@9600` |
    /// | poll_interval   | 10 ms               |
    /// | read_timeout    | 50 ms               |
    /// | max_attempts    | 100                 |
    /// | max_line_length | 1024                |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9994)),
            device: DeviceEndpoint::Serial {
                path: DEFAULT_DEVICE_PATH.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
