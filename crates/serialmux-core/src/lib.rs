//! # serialmux-core
//!
//! Shared library for serialmux containing the domain types, the device line
//! protocol rules, and the mailbox registry that every client session and the
//! correlation engine synchronise through.
//!
//! It has no dependency on sockets, serial ports or an async runtime, so all
//! of the queueing rules can be tested with plain `#[test]` functions.
//!
//! # Architecture overview
//!
//! serialmux lets many TCP clients share one half-duplex serial device.  The
//! device only understands one conversation at a time, so client commands are
//! queued, written one after another, and the replies are routed back to the
//! client that asked.  Lines the device emits on its own are broadcast.
//!
//! - **`domain`** – Identity and message types: [`ClientId`], [`Origin`],
//!   [`Message`].
//!
//! - **`protocol`** – The rules of the device line protocol: comments,
//!   command tokens, and the `!timeout` sentinel.
//!
//! - **`mailbox`** – The [`MailboxRegistry`]: live client set, per-client
//!   mailboxes and the global FIFO of outgoing commands.

pub mod domain;
pub mod mailbox;
pub mod protocol;

pub use domain::client::ClientId;
pub use domain::message::{Message, Origin};
pub use mailbox::{MailboxError, MailboxRegistry, OutgoingQueue};
pub use protocol::line::{
    answers, command_token, is_comment, is_significant, LINE_TERMINATOR, TIMEOUT_SENTINEL,
};
