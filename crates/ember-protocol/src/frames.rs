//! Event types for the Ember protocol.
//!
//! Events are the fundamental unit of communication between a client socket
//! and the relay. Each event is an adjacently tagged object whose `event`
//! field names the operation and whose `data` field carries the payload.

use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;

/// Cipher label used when a client does not name one.
pub const DEFAULT_CIPHER: &str = "Plain";

/// Error codes carried by [`ServerEvent::Error`].
pub mod error_code {
    /// A required field of the request was missing or empty.
    pub const VALIDATION: u16 = 4000;
    /// The event could not be decoded.
    pub const MALFORMED: u16 = 4001;
    /// The message could not be persisted.
    pub const PERSISTENCE: u16 = 5000;
}

/// Event names, used for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Login,
    JoinRoom,
    PrivateMessage,
    MessageSeen,
    Ping,
    Connected,
    ReceiveMessage,
    MessageBurnt,
    GetUsers,
    Error,
    Pong,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Login => "login",
            EventKind::JoinRoom => "join_room",
            EventKind::PrivateMessage => "private_message",
            EventKind::MessageSeen => "message_seen",
            EventKind::Ping => "ping",
            EventKind::Connected => "connected",
            EventKind::ReceiveMessage => "receive_message",
            EventKind::MessageBurnt => "message_burnt",
            EventKind::GetUsers => "get_users",
            EventKind::Error => "error",
            EventKind::Pong => "pong",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_cipher() -> String {
    DEFAULT_CIPHER.to_string()
}

/// Payload of `join_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: String,
}

/// Payload of `private_message`.
///
/// Every field is optional on the wire so that a request with missing fields
/// reaches validation instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub text: String,
    /// Cosmetic label only; the relay never interprets it.
    #[serde(default = "default_cipher")]
    pub cipher_type: String,
    /// Whether the message should burn after the configured delay.
    #[serde(default)]
    pub is_burn: bool,
}

impl SendRequest {
    /// Create a plain, non-burning request.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            text: text.into(),
            cipher_type: default_cipher(),
            is_burn: false,
        }
    }

    /// Mark the request as a burn message.
    #[must_use]
    pub fn burning(mut self) -> Self {
        self.is_burn = true;
        self
    }

    /// Set the cipher label.
    #[must_use]
    pub fn with_cipher(mut self, cipher_type: impl Into<String>) -> Self {
        self.cipher_type = cipher_type.into();
        self
    }
}

/// A persisted message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Identifier assigned by the store.
    pub id: u64,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub cipher_type: String,
    pub is_burn: bool,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Client to server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Identify this connection as a user.
    #[serde(rename = "login")]
    Login(String),

    /// Join the two-party channel of a conversation.
    #[serde(rename = "join_room")]
    JoinRoom(RoomRequest),

    /// Persist and deliver a message.
    #[serde(rename = "private_message")]
    PrivateMessage(SendRequest),

    /// Acknowledge that a message has been displayed.
    #[serde(rename = "message_seen")]
    MessageSeen(u64),

    /// Keepalive.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Login(_) => EventKind::Login,
            ClientEvent::JoinRoom(_) => EventKind::JoinRoom,
            ClientEvent::PrivateMessage(_) => EventKind::PrivateMessage,
            ClientEvent::MessageSeen(_) => EventKind::MessageSeen,
            ClientEvent::Ping { .. } => EventKind::Ping,
        }
    }

    /// Create a `login` event.
    #[must_use]
    pub fn login(user_id: impl Into<String>) -> Self {
        ClientEvent::Login(user_id.into())
    }

    /// Create a `join_room` event.
    #[must_use]
    pub fn join_room(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        ClientEvent::JoinRoom(RoomRequest {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        })
    }
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once when the socket opens.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        connection_id: String,
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A persisted message.
    #[serde(rename = "receive_message")]
    ReceiveMessage(ChatMessage),

    /// A burn message was deleted and must be removed from view.
    #[serde(rename = "message_burnt")]
    MessageBurnt(u64),

    /// Snapshot of online user ids.
    #[serde(rename = "get_users")]
    GetUsers(Vec<String>),

    /// A request from this connection failed.
    #[serde(rename = "error")]
    Error { code: u16, message: String },

    /// Keepalive reply.
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected { .. } => EventKind::Connected,
            ServerEvent::ReceiveMessage(_) => EventKind::ReceiveMessage,
            ServerEvent::MessageBurnt(_) => EventKind::MessageBurnt,
            ServerEvent::GetUsers(_) => EventKind::GetUsers,
            ServerEvent::Error { .. } => EventKind::Error,
            ServerEvent::Pong { .. } => EventKind::Pong,
        }
    }

    /// Create a `connected` event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a `pong` event.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerEvent::Pong { timestamp }
    }
}
