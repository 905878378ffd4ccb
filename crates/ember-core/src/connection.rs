//! Live connection handles.
//!
//! Each socket owns one [`ConnectionHandle`]: an id plus the queue its
//! writer task drains. The [`ConnectionTable`] holds every live handle so
//! that snapshots and burn notifications can reach them.

use crate::message::UserId;
use dashmap::DashMap;
use ember_protocol::ServerEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outbound side of one socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer drains.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { id, outbound }, rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event for this connection.
    ///
    /// Returns `false` if the socket has already gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        let kind = event.kind();
        let sent = self.outbound.send(event).is_ok();
        if sent {
            trace!(connection = %self.id, event = %kind, "Queued event");
        } else {
            debug!(connection = %self.id, event = %kind, "Dropped event for closed connection");
        }
        sent
    }
}

struct Entry {
    handle: ConnectionHandle,
    user: Option<UserId>,
}

/// Every live connection, with the user it identified as.
#[derive(Default)]
pub struct ConnectionTable {
    entries: DashMap<ConnectionId, Entry>,
}

impl ConnectionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no live connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a freshly opened connection.
    pub fn insert(&self, handle: ConnectionHandle) {
        let id = handle.id().clone();
        self.entries.insert(id, Entry { handle, user: None });
    }

    /// Remove a connection. Returns `true` if it was present.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Record which user a connection identified as.
    pub fn identify(&self, id: &ConnectionId, user: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.user = Some(user.to_string());
        }
    }

    /// Get a connection's handle.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.entries.get(id).map(|e| e.handle.clone())
    }

    /// Every connection identified as one of `users`.
    #[must_use]
    pub fn sessions_of(&self, users: &[&str]) -> Vec<ConnectionHandle> {
        self.entries
            .iter()
            .filter(|e| e.user.as_deref().is_some_and(|u| users.contains(&u)))
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Every live connection.
    #[must_use]
    pub fn all(&self) -> Vec<ConnectionHandle> {
        self.entries.iter().map(|e| e.handle.clone()).collect()
    }

    /// Send an event to every live connection.
    ///
    /// Returns the number of connections it was queued for.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        // Collect first so no shard lock is held while sending.
        self.all()
            .into_iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }
}
