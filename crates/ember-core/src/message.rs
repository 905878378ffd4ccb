//! Message types for Ember.
//!
//! A [`NewMessage`] is what a client asks to send; a [`Message`] is what
//! the store hands back once it has assigned an id and a timestamp.

use ember_protocol::{ChatMessage, SendRequest};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message identifier, assigned by the store.
pub type MessageId = u64;

/// An opaque user identifier issued outside the relay.
pub type UserId = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub cipher_type: String,
    pub is_ephemeral: bool,
}

impl NewMessage {
    /// Create a plain, non-ephemeral draft.
    #[must_use]
    pub fn new(
        sender_id: impl Into<UserId>,
        receiver_id: impl Into<UserId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            text: text.into(),
            cipher_type: ember_protocol::frames::DEFAULT_CIPHER.to_string(),
            is_ephemeral: false,
        }
    }

    /// Flag the draft for burning.
    #[must_use]
    pub fn ephemeral(mut self) -> Self {
        self.is_ephemeral = true;
        self
    }

    /// Set the cipher label.
    #[must_use]
    pub fn with_cipher(mut self, cipher_type: impl Into<String>) -> Self {
        self.cipher_type = cipher_type.into();
        self
    }

    /// Check that sender, receiver and text are present.
    ///
    /// # Errors
    ///
    /// Returns the name of the first missing field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.sender_id.is_empty() {
            return Err("senderId is required");
        }
        if self.receiver_id.is_empty() {
            return Err("receiverId is required");
        }
        if self.text.is_empty() {
            return Err("text is required");
        }
        Ok(())
    }
}

impl From<SendRequest> for NewMessage {
    fn from(request: SendRequest) -> Self {
        Self {
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            text: request.text,
            cipher_type: request.cipher_type,
            is_ephemeral: request.is_burn,
        }
    }
}

/// A persisted message. Immutable until it is burnt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub cipher_type: String,
    pub is_ephemeral: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Message {
    /// Build the persisted form of a draft.
    #[must_use]
    pub fn from_draft(id: MessageId, created_at: u64, draft: NewMessage) -> Self {
        Self {
            id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            text: draft.text,
            cipher_type: draft.cipher_type,
            is_ephemeral: draft.is_ephemeral,
            created_at,
        }
    }

    /// Wire form of the message.
    #[must_use]
    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            text: self.text.clone(),
            cipher_type: self.cipher_type.clone(),
            is_burn: self.is_ephemeral,
            created_at: self.created_at,
        }
    }
}
