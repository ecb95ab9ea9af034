//! Global FIFO of commands waiting to be written to the device.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::client::ClientId;
use crate::domain::message::Message;

/// Commands from all clients, in the order they were submitted.
///
/// The order messages leave through [`pop`](Self::pop) is the order they are
/// written to the device; there is no per-client priority.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    queue: Mutex<VecDeque<Message>>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the tail.
    pub fn push(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Removes and returns the head, or `None` when empty.
    pub fn pop(&self) -> Option<Message> {
        self.lock().pop_front()
    }

    /// Drops every queued message submitted by `id`.  Returns how many were
    /// removed.
    pub fn purge(&self, id: ClientId) -> usize {
        let mut queue = self.lock();
        let before = queue.len();
        queue.retain(|m| !m.belongs_to(id));
        before - queue.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every mutation is a single VecDeque call, so a poisoned lock still
    // guards a consistent deque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
