//! Domain entities shared by the engine and the client sessions.
//!
//! These types carry no I/O.  A [`client::ClientId`] names one live
//! connection; a [`message::Message`] is one line of text travelling either
//! from a client towards the device or from the device towards a mailbox.

pub mod client;
pub mod message;
