//! Shared queues between client sessions and the correlation engine.
//!
//! # Locking
//!
//! Two independent locks, never held at the same time:
//!
//! - the **mailbox lock** guards the live-client set together with every
//!   client's inbound mailbox.  Registration *is* the presence of a mailbox,
//!   so a broadcast can never land in a mailbox that was already purged.
//! - the **outgoing lock** guards the global FIFO of commands waiting for
//!   the device.
//!
//! Neither lock is ever held across channel I/O; the engine pops a message,
//! releases the lock, then talks to the device.

pub mod outgoing;
pub mod registry;

use thiserror::Error;

use crate::domain::client::ClientId;

pub use outgoing::OutgoingQueue;
pub use registry::MailboxRegistry;

/// Errors reported by registry operations on client ids.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// `register` was called for an id that is already live.
    #[error("client {0} is already registered")]
    DuplicateClient(ClientId),

    /// The id is not (or no longer) registered.
    #[error("client {0} is not registered")]
    UnknownClient(ClientId),
}
