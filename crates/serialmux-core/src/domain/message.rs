//! Line messages exchanged between clients, the engine and the device.

use serde::{Deserialize, Serialize};

use super::client::ClientId;

/// Who a message belongs to.
///
/// Outgoing messages always carry the `Client` that submitted them.  Incoming
/// messages carry the `Client` they answer, or `Broadcast` when they are
/// unsolicited device output fanned out to every mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Client(ClientId),
    Broadcast,
}

impl Origin {
    /// Returns the client id for `Client` origins.
    pub fn client(&self) -> Option<ClientId> {
        match self {
            Origin::Client(id) => Some(*id),
            Origin::Broadcast => None,
        }
    }
}

/// One line of text, without its line terminator.
///
/// Messages are immutable once built; the queues only ever move or clone
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    origin: Origin,
    payload: String,
}

impl Message {
    /// Builds a message addressed to (or sent by) a single client.
    pub fn from_client(id: ClientId, payload: impl Into<String>) -> Self {
        Self {
            origin: Origin::Client(id),
            payload: payload.into(),
        }
    }

    /// Builds an unsolicited device line destined for every client.
    pub fn broadcast(payload: impl Into<String>) -> Self {
        Self {
            origin: Origin::Broadcast,
            payload: payload.into(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }

    /// `true` when the message was sent by (or answers) `id`.
    pub fn belongs_to(&self, id: ClientId) -> bool {
        self.origin == Origin::Client(id)
    }
}
