//! Domain layer for serialmux-server.
//!
//! Plain configuration types with validation.  Nothing here reads files,
//! environment variables or sockets; the infrastructure layer and `main.rs`
//! populate these structs.

pub mod config;

pub use config::{ConfigError, DeviceEndpoint, ServerConfig};
