//! Outbound message queue.
//!
//! Messages entered while a send is in flight land here instead of opening a
//! second stream. Auto-flush after a completed generation drains strictly
//! FIFO; the "arrow-up to recall" interaction pops the most recent entry
//! (LIFO) without disturbing the rest of the queue.

use std::collections::VecDeque;

use bichat_core::session::Attachment;
use serde::{Deserialize, Serialize};

/// A message captured while another send was in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Message text
    pub content: String,
    /// Attached files
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Timestamp when the message was queued (ISO 8601 format)
    pub queued_at: String,
}

impl QueuedMessage {
    /// Creates a queued message stamped with the current time.
    pub fn new(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            content: content.into(),
            attachments,
            queued_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// FIFO of messages waiting for the current stream to finish.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the back of the queue.
    pub fn enqueue(&mut self, message: QueuedMessage) {
        self.entries.push_back(message);
    }

    /// Removes and returns the oldest entry (auto-flush order).
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        self.entries.pop_front()
    }

    /// Returns the most recently queued entry without removing it.
    pub fn peek_latest(&self) -> Option<&QueuedMessage> {
        self.entries.back()
    }

    /// Removes and returns the most recently queued entry (manual recall).
    ///
    /// The remaining entries keep their order.
    pub fn pop_latest(&mut self) -> Option<QueuedMessage> {
        self.entries.pop_back()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all queued messages (session reset).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
