//! Persistence gateway.
//!
//! The relay never owns durable storage; it writes through a
//! [`MessageStore`]. [`MemoryStore`] is the in-process backend used by the
//! binary and by tests.

use crate::message::{now_millis, Message, MessageId, NewMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

/// Store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the operation.
    #[error("Store error: {0}")]
    Backend(String),
}

/// Durable message storage consumed by the router and the burn scheduler.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a draft, assigning its id and creation time.
    async fn create_message(&self, draft: NewMessage) -> Result<Message, StoreError>;

    /// Delete a message.
    ///
    /// Returns `true` if a record was removed. A missing id is not an error.
    async fn delete_message(&self, id: MessageId) -> Result<bool, StoreError>;

    /// Look up a message by id.
    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// All messages exchanged between `a` and `b` in either direction,
    /// oldest first.
    async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError>;
}

/// In-memory message store with sequential ids.
#[derive(Debug)]
pub struct MemoryStore {
    messages: DashMap<MessageId, Message>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store. The first message gets id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check if a message id is stored.
    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = Message::from_draft(id, now_millis(), draft);
        self.messages.insert(id, message.clone());
        trace!(message_id = id, "Stored message");
        Ok(message)
    }

    async fn delete_message(&self, id: MessageId) -> Result<bool, StoreError> {
        let removed = self.messages.remove(&id).is_some();
        debug!(message_id = id, removed, "Deleted message");
        Ok(removed)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.get(&id).map(|m| m.clone()))
    }

    async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }
}
