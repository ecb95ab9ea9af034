//! Application layer: the correlation engine.
//!
//! The engine depends only on the [`SerialChannel`] trait and the shared
//! [`serialmux_core::MailboxRegistry`], so it is driven in tests by scripted
//! channels without any serial port or socket.

pub mod correlate;

pub use correlate::{ChannelError, CorrelationEngine, EngineError, SerialChannel, StepReport};
