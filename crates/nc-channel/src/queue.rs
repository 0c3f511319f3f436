//! Thread-safe FIFO of protocol messages
//!
//! Each channel owns one queue for outbound and one for inbound messages.
//! Any thread may append; the channel's I/O task drains.

use std::collections::VecDeque;

use nc_protocol::Message;
use parking_lot::{Mutex, MutexGuard};

/// Mutex-guarded message FIFO
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the tail
    pub fn add(&self, message: Message) {
        self.messages.lock().push_back(message);
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Hold the queue lock for a multi-step operation
    pub fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock()
    }

    /// Remove and return every queued message in FIFO order
    pub fn drain(&self) -> Vec<Message> {
        self.messages.lock().drain(..).collect()
    }

    /// Discard every queued message
    pub fn release(&self) {
        self.messages.lock().clear();
    }
}
