//! MailboxRegistry: live clients, their mailboxes, and the outgoing queue.
//!
//! The registry is the only state shared between client sessions and the
//! correlation engine.  It is built once at startup, wrapped in an `Arc`, and
//! handed to the engine and to every session.
//!
//! # Client lifecycle
//!
//! ```text
//! unregistered ──register──► registered ──unregister──► unregistered
//!                               │  ▲
//!                        submit │  │ deliver / deliver_broadcast
//!                               ▼  │
//!                         outgoing  mailbox ──drain──► session socket
//! ```
//!
//! `unregister` purges both the client's mailbox and any of its commands
//! still waiting in the outgoing queue.  A command already written to the
//! device is not retracted; its reply arrives later and is dropped by
//! [`MailboxRegistry::deliver`] because the mailbox no longer exists.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{MailboxError, OutgoingQueue};
use crate::domain::client::ClientId;
use crate::domain::message::Message;

type Mailboxes = HashMap<ClientId, VecDeque<Message>>;

/// Registry of live clients plus the inbound and outbound queues.
#[derive(Debug, Default)]
pub struct MailboxRegistry {
    mailboxes: Mutex<Mailboxes>,
    outgoing: OutgoingQueue,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Adds `id` to the live set with an empty mailbox.
    ///
    /// # Errors
    ///
    /// [`MailboxError::DuplicateClient`] if `id` is already registered.
    pub fn register(&self, id: ClientId) -> Result<(), MailboxError> {
        let mut mailboxes = self.lock_mailboxes();
        if mailboxes.contains_key(&id) {
            return Err(MailboxError::DuplicateClient(id));
        }
        mailboxes.insert(id, VecDeque::new());
        debug!("client {id} registered ({} live)", mailboxes.len());
        Ok(())
    }

    /// Removes `id`, discarding its mailbox and its still-queued commands.
    ///
    /// The outgoing purge runs even when `id` was not registered, so calling
    /// this twice leaves the queues in the same state as calling it once.
    ///
    /// # Errors
    ///
    /// [`MailboxError::UnknownClient`] if `id` was not registered.
    pub fn unregister(&self, id: ClientId) -> Result<(), MailboxError> {
        let removed = {
            let mut mailboxes = self.lock_mailboxes();
            mailboxes.remove(&id)
        };
        let purged_outgoing = self.outgoing.purge(id);

        match removed {
            Some(mailbox) => {
                debug!(
                    "client {id} unregistered; discarded {} undelivered and {purged_outgoing} unsent message(s)",
                    mailbox.len()
                );
                Ok(())
            }
            None => Err(MailboxError::UnknownClient(id)),
        }
    }

    pub fn is_registered(&self, id: ClientId) -> bool {
        self.lock_mailboxes().contains_key(&id)
    }

    /// Number of live clients.
    pub fn client_count(&self) -> usize {
        self.lock_mailboxes().len()
    }

    // ── Inbound (device → client) ─────────────────────────────────────────────

    /// Appends `message` to the mailbox of `id`.
    ///
    /// # Errors
    ///
    /// [`MailboxError::UnknownClient`] if `id` is not registered; the message
    /// is dropped.
    pub fn deliver(&self, id: ClientId, message: Message) -> Result<(), MailboxError> {
        let mut mailboxes = self.lock_mailboxes();
        match mailboxes.get_mut(&id) {
            Some(mailbox) => {
                mailbox.push_back(message);
                Ok(())
            }
            None => Err(MailboxError::UnknownClient(id)),
        }
    }

    /// Appends a copy of `message` to every currently registered mailbox and
    /// returns the number of recipients.
    ///
    /// Clients registered afterwards do not receive it.
    pub fn deliver_broadcast(&self, message: Message) -> usize {
        let mut mailboxes = self.lock_mailboxes();
        for mailbox in mailboxes.values_mut() {
            mailbox.push_back(message.clone());
        }
        mailboxes.len()
    }

    /// Removes and returns every message queued for `id`, oldest first.
    ///
    /// # Errors
    ///
    /// [`MailboxError::UnknownClient`] if `id` is not registered.
    pub fn drain(&self, id: ClientId) -> Result<Vec<Message>, MailboxError> {
        let mut mailboxes = self.lock_mailboxes();
        let mailbox = mailboxes
            .get_mut(&id)
            .ok_or(MailboxError::UnknownClient(id))?;
        Ok(mailbox.drain(..).collect())
    }

    /// Returns copies of the messages queued for `id` without removing them.
    ///
    /// # Errors
    ///
    /// [`MailboxError::UnknownClient`] if `id` is not registered.
    pub fn peek(&self, id: ClientId) -> Result<Vec<Message>, MailboxError> {
        let mailboxes = self.lock_mailboxes();
        let mailbox = mailboxes.get(&id).ok_or(MailboxError::UnknownClient(id))?;
        Ok(mailbox.iter().cloned().collect())
    }

    // ── Outbound (client → device) ────────────────────────────────────────────

    /// Queues `payload` as a command from `id`.
    ///
    /// # Errors
    ///
    /// [`MailboxError::UnknownClient`] if `id` is not registered.
    pub fn submit(&self, id: ClientId, payload: impl Into<String>) -> Result<(), MailboxError> {
        // The push happens under the mailbox lock, so it lands either before
        // `unregister` removes `id` (and is purged with it) or not at all.
        // Lock order is mailboxes, then outgoing.
        let mailboxes = self.lock_mailboxes();
        if !mailboxes.contains_key(&id) {
            return Err(MailboxError::UnknownClient(id));
        }
        self.outgoing.push(Message::from_client(id, payload));
        Ok(())
    }

    /// Removes the oldest queued command.
    pub fn pop_outgoing(&self) -> Option<Message> {
        self.outgoing.pop()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    fn lock_mailboxes(&self) -> MutexGuard<'_, Mailboxes> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Origin;

    fn payloads(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(Message::payload).collect()
    }

    // ── register / unregister ────────────────────────────────────────────────

    #[test]
    fn test_registry_starts_empty() {
        let registry = MailboxRegistry::new();
        assert_eq!(registry.client_count(), 0);
        assert_eq!(registry.outgoing_len(), 0);
    }

    #[test]
    fn test_register_adds_client() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();

        registry.register(id).unwrap();

        assert!(registry.is_registered(id));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_register_twice_returns_duplicate_client() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();

        let result = registry.register(id);

        assert_eq!(result, Err(MailboxError::DuplicateClient(id)));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_unregister_unknown_client_returns_unknown_client() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        assert_eq!(registry.unregister(id), Err(MailboxError::UnknownClient(id)));
    }

    #[test]
    fn test_unregister_purges_mailbox_and_pending_outgoing() {
        // Arrange
        let registry = MailboxRegistry::new();
        let leaving = ClientId::new();
        let staying = ClientId::new();
        registry.register(leaving).unwrap();
        registry.register(staying).unwrap();
        registry.submit(leaving, "slow").unwrap();
        registry.submit(staying, "ping").unwrap();
        registry.submit(leaving, "door state").unwrap();
        registry
            .deliver(leaving, Message::from_client(leaving, "old reply"))
            .unwrap();

        // Act
        registry.unregister(leaving).unwrap();

        // Assert: only the other client's command survives
        assert!(!registry.is_registered(leaving));
        assert_eq!(registry.outgoing_len(), 1);
        let head = registry.pop_outgoing().unwrap();
        assert_eq!(head.payload(), "ping");
        assert!(head.belongs_to(staying));
        assert_eq!(
            registry.drain(leaving),
            Err(MailboxError::UnknownClient(leaving))
        );
    }

    #[test]
    fn test_unregister_twice_reports_unknown_second_time() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();

        assert!(registry.unregister(id).is_ok());
        assert_eq!(registry.unregister(id), Err(MailboxError::UnknownClient(id)));
    }

    #[test]
    fn test_id_can_be_registered_again_after_unregister() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();
        registry.unregister(id).unwrap();

        assert!(registry.register(id).is_ok());
        assert!(registry.drain(id).unwrap().is_empty());
    }

    // ── deliver / broadcast ──────────────────────────────────────────────────

    #[test]
    fn test_deliver_reaches_only_the_addressed_client() {
        let registry = MailboxRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        registry.deliver(a, Message::from_client(a, "ping ok")).unwrap();

        assert_eq!(payloads(&registry.drain(a).unwrap()), vec!["ping ok"]);
        assert!(registry.drain(b).unwrap().is_empty());
    }

    #[test]
    fn test_deliver_to_unregistered_client_is_dropped() {
        let registry = MailboxRegistry::new();
        let gone = ClientId::new();

        let result = registry.deliver(gone, Message::from_client(gone, "late reply"));

        assert_eq!(result, Err(MailboxError::UnknownClient(gone)));
        assert!(!registry.is_registered(gone));
    }

    #[test]
    fn test_broadcast_reaches_all_registered_clients() {
        let registry = MailboxRegistry::new();
        let b = ClientId::new();
        let c = ClientId::new();
        registry.register(b).unwrap();
        registry.register(c).unwrap();

        let recipients = registry.deliver_broadcast(Message::broadcast("alert fire"));

        assert_eq!(recipients, 2);
        for id in [b, c] {
            let drained = registry.drain(id).unwrap();
            assert_eq!(payloads(&drained), vec!["alert fire"]);
            assert_eq!(drained[0].origin(), Origin::Broadcast);
        }
    }

    #[test]
    fn test_broadcast_is_not_retroactive() {
        let registry = MailboxRegistry::new();
        let early = ClientId::new();
        registry.register(early).unwrap();
        registry.deliver_broadcast(Message::broadcast("alert fire"));

        let late = ClientId::new();
        registry.register(late).unwrap();

        assert!(registry.drain(late).unwrap().is_empty());
        assert_eq!(registry.drain(early).unwrap().len(), 1);
    }

    #[test]
    fn test_broadcast_with_no_clients_reaches_nobody() {
        let registry = MailboxRegistry::new();
        assert_eq!(registry.deliver_broadcast(Message::broadcast("x")), 0);
    }

    #[test]
    fn test_broadcasts_and_replies_interleave_in_append_order() {
        let registry = MailboxRegistry::new();
        let a = ClientId::new();
        registry.register(a).unwrap();

        registry.deliver_broadcast(Message::broadcast("door open"));
        registry.deliver(a, Message::from_client(a, "ping ok")).unwrap();
        registry.deliver_broadcast(Message::broadcast("door closed"));

        assert_eq!(
            payloads(&registry.drain(a).unwrap()),
            vec!["door open", "ping ok", "door closed"]
        );
    }

    // ── drain / peek ─────────────────────────────────────────────────────────

    #[test]
    fn test_drain_empty_mailbox_twice_returns_empty_both_times() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();

        assert!(registry.drain(id).unwrap().is_empty());
        assert!(registry.drain(id).unwrap().is_empty());
    }

    #[test]
    fn test_drain_removes_messages() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();
        registry.deliver(id, Message::from_client(id, "one")).unwrap();

        assert_eq!(registry.drain(id).unwrap().len(), 1);
        assert!(registry.drain(id).unwrap().is_empty());
    }

    #[test]
    fn test_peek_leaves_messages_in_place() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        registry.register(id).unwrap();
        registry.deliver(id, Message::from_client(id, "one")).unwrap();
        registry.deliver(id, Message::from_client(id, "two")).unwrap();

        let peeked = registry.peek(id).unwrap();
        let drained = registry.drain(id).unwrap();

        assert_eq!(payloads(&peeked), vec!["one", "two"]);
        assert_eq!(peeked, drained);
    }

    #[test]
    fn test_drain_unknown_client_is_an_error() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();
        assert_eq!(registry.drain(id), Err(MailboxError::UnknownClient(id)));
        assert_eq!(registry.peek(id), Err(MailboxError::UnknownClient(id)));
    }

    // ── submit ───────────────────────────────────────────────────────────────

    #[test]
    fn test_submit_from_unregistered_client_is_rejected() {
        let registry = MailboxRegistry::new();
        let id = ClientId::new();

        assert_eq!(registry.submit(id, "ping"), Err(MailboxError::UnknownClient(id)));
        assert_eq!(registry.outgoing_len(), 0);
    }

    #[test]
    fn test_submit_preserves_global_fifo_order() {
        let registry = MailboxRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        registry.submit(a, "cmd1").unwrap();
        registry.submit(b, "cmd2").unwrap();

        assert_eq!(registry.pop_outgoing().unwrap().payload(), "cmd1");
        assert_eq!(registry.pop_outgoing().unwrap().payload(), "cmd2");
        assert!(registry.pop_outgoing().is_none());
    }

    #[test]
    fn test_submit_racing_unregister_leaves_nothing_queued() {
        use std::sync::Arc;
        use std::thread;

        for _ in 0..50 {
            // Arrange
            let registry = Arc::new(MailboxRegistry::new());
            let id = ClientId::new();
            registry.register(id).unwrap();

            // Act: keep submitting until the registry refuses
            let submitter = {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut n = 0usize;
                    while registry.submit(id, format!("cmd{n}")).is_ok() {
                        n += 1;
                    }
                })
            };
            thread::yield_now();
            registry.unregister(id).unwrap();
            submitter.join().unwrap();

            // Assert
            assert_eq!(registry.outgoing_len(), 0);
        }
    }

    #[test]
    fn test_concurrent_sessions_never_lose_or_duplicate_commands() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MailboxRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let id = ClientId::new();
                    registry.register(id).unwrap();
                    for i in 0..50 {
                        registry.submit(id, format!("c{n} {i}")).unwrap();
                    }
                    id
                })
            })
            .collect();
        let ids: Vec<ClientId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.client_count(), 8);
        assert_eq!(registry.outgoing_len(), 400);

        // Per-client submission order survives inside the global FIFO.
        let mut next_index = std::collections::HashMap::new();
        while let Some(msg) = registry.pop_outgoing() {
            let id = msg.origin().client().unwrap();
            let seq: usize = msg.payload().split_whitespace().nth(1).unwrap().parse().unwrap();
            let expected = next_index.entry(id).or_insert(0usize);
            assert_eq!(seq, *expected);
            *expected += 1;
        }
        assert!(ids.iter().all(|id| next_index[id] == 50));
    }
}
