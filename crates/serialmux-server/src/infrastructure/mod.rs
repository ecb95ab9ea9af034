//! Infrastructure layer for serialmux-server.
//!
//! Everything that touches the outside world lives here: the device stream,
//! client sockets, timers and the config file.
//!
//! # Responsibilities
//!
//! - Framing newline-terminated text on sockets and the device
//! - Opening the serial port or TCP serial bridge
//! - Accepting client connections and running one session task per client
//! - Loading the TOML config file
//! - Starting and stopping the engine and listener together
//! - The one-shot `query` client
//!
//! # What does NOT belong here?
//!
//! - Correlation rules (application layer)
//! - Queueing rules (`serialmux-core`)

pub mod codec;
pub mod config_file;
pub mod daemon;
pub mod device;
pub mod query;
pub mod session;
pub mod tcp_server;

pub use daemon::Daemon;
pub use query::{query, QueryError, QueryOutcome};
pub use tcp_server::run_server;
