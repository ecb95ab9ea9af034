//! serialmux-server library crate.
//!
//! Shares one half-duplex serial device among many TCP clients.  Each client
//! sends newline-terminated commands; the correlation engine writes them to
//! the device one at a time and routes every reply back to the client that
//! asked.  Device output that answers nobody is broadcast to every client.
//!
//! # Architecture
//!
//! ```text
//! TCP clients (newline-terminated text)
//!         ↕
//! [serialmux-server]
//!   ├── domain/           ServerConfig, DeviceEndpoint
//!   ├── application/      CorrelationEngine over the SerialChannel trait
//!   └── infrastructure/
//!         ├── codec        newline framing shared by sockets and device
//!         ├── device       SerialChannel over a serial port or TCP bridge
//!         ├── session      one task per client connection
//!         ├── tcp_server   accept loop
//!         ├── daemon       startup / shutdown wiring
//!         ├── config_file  TOML config layer
//!         └── query        one-shot command client
//!         ↕
//! serial device (newline-terminated text, `#` comments)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain`, `serialmux-core`, and the
//!   [`application::SerialChannel`] trait; never on sockets or ports.
//! - `infrastructure` owns every socket, port, timer and file.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: command/reply correlation.
pub mod application;

/// Infrastructure layer: device channel, TCP sessions, lifecycle.
pub mod infrastructure;
