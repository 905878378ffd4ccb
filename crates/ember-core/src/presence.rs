//! Presence registry for Ember.
//!
//! Maps each online user to the connection that delivers to them. The last
//! connection to log in as a user wins; an earlier tab keeps its socket but
//! stops being the delivery target.

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionTable};
use crate::message::UserId;
use ember_protocol::ServerEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Online users and their delivery connection.
///
/// All mutation goes through one mutex. Snapshots are queued to every
/// connection while that lock is held, so clients see them in mutation
/// order.
pub struct PresenceRegistry {
    entries: Mutex<HashMap<UserId, ConnectionHandle>>,
    connections: Arc<ConnectionTable>,
}

impl PresenceRegistry {
    /// Create a registry broadcasting to `connections`.
    #[must_use]
    pub fn new(connections: Arc<ConnectionTable>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connections,
        }
    }

    /// Register `connection` as the delivery target for `user`.
    ///
    /// Overwrites any earlier entry for the user, then broadcasts the
    /// updated online list to every connection. Returns that list.
    pub fn register(&self, user: &str, connection: ConnectionHandle) -> Vec<UserId> {
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.insert(user.to_string(), connection.clone()) {
            if previous.id() != connection.id() {
                debug!(
                    user = %user,
                    previous = %previous.id(),
                    connection = %connection.id(),
                    "Presence: replaced delivery connection"
                );
            }
        }
        let snapshot = Self::snapshot_of(&entries);

        debug!(user = %user, connection = %connection.id(), online = snapshot.len(), "Presence: registered");
        self.connections
            .broadcast(&ServerEvent::GetUsers(snapshot.clone()));
        snapshot
    }

    /// Remove every entry whose delivery connection is `connection`.
    ///
    /// Broadcasts the updated online list only if something was removed.
    /// Returns the removed users.
    pub fn unregister(&self, connection: &ConnectionId) -> Vec<UserId> {
        let mut entries = self.entries.lock();
        let removed = Self::remove_connection(&mut entries, connection);
        if !removed.is_empty() {
            self.connections
                .broadcast(&ServerEvent::GetUsers(Self::snapshot_of(&entries)));
        }
        removed
    }

    /// Unregister a closing connection.
    ///
    /// Unlike [`PresenceRegistry::unregister`], exactly one snapshot is
    /// broadcast whether or not an entry was removed.
    pub fn release(&self, connection: &ConnectionId) -> Vec<UserId> {
        let mut entries = self.entries.lock();
        let removed = Self::remove_connection(&mut entries, connection);
        self.connections
            .broadcast(&ServerEvent::GetUsers(Self::snapshot_of(&entries)));
        removed
    }

    /// The delivery connection for `user`, if online.
    #[must_use]
    pub fn lookup(&self, user: &str) -> Option<ConnectionHandle> {
        self.entries.lock().get(user).cloned()
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, user: &str) -> bool {
        self.entries.lock().contains_key(user)
    }

    /// Number of online users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    fn remove_connection(
        entries: &mut HashMap<UserId, ConnectionHandle>,
        connection: &ConnectionId,
    ) -> Vec<UserId> {
        let removed: Vec<UserId> = entries
            .iter()
            .filter(|(_, handle)| handle.id() == connection)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &removed {
            entries.remove(user);
        }
        if !removed.is_empty() {
            debug!(connection = %connection, users = ?removed, "Presence: unregistered");
        }
        removed
    }

    fn snapshot_of(entries: &HashMap<UserId, ConnectionHandle>) -> Vec<UserId> {
        let mut users: Vec<UserId> = entries.keys().cloned().collect();
        users.sort();
        users
    }
}
