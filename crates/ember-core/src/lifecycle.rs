//! Connection lifecycle.
//!
//! Every socket moves through `Anonymous → Identified → Closed`. Logging in
//! registers presence. Closing always unregisters and broadcasts one online
//! list, even for a socket that never identified.

use crate::channel::{ChannelError, ChannelKey};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::message::UserId;
use crate::router::MessageRouter;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle state of one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, no login yet.
    Anonymous,
    /// Logged in as a user.
    Identified(UserId),
    /// Closed; the handle is gone from every registry.
    Closed,
}

/// Owns one socket's handle and drives registry updates for it.
pub struct ConnectionLifecycle {
    handle: ConnectionHandle,
    router: Arc<MessageRouter>,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    /// Open a connection: the handle becomes visible to broadcasts.
    #[must_use]
    pub fn open(router: Arc<MessageRouter>, handle: ConnectionHandle) -> Self {
        router.connections().insert(handle.clone());
        debug!(connection = %handle.id(), "Connection opened");
        Self {
            handle,
            router,
            state: ConnectionState::Anonymous,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// Get the connection handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The user this connection logged in as.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Identified(user) => Some(user),
            _ => None,
        }
    }

    /// Handle a `login` event.
    ///
    /// Registers this connection as the user's delivery target and
    /// broadcasts the online list. An empty id or a closed connection is
    /// ignored. Returns `true` if the login took effect.
    pub fn login(&mut self, user: &str) -> bool {
        if user.is_empty() || self.state == ConnectionState::Closed {
            debug!(connection = %self.id(), "Ignoring login");
            return false;
        }

        self.router.connections().identify(self.handle.id(), user);
        self.router.presence().register(user, self.handle.clone());
        self.state = ConnectionState::Identified(user.to_string());
        debug!(connection = %self.id(), user = %user, "Connection identified");
        true
    }

    /// Handle a `join_room` event.
    ///
    /// # Errors
    ///
    /// Returns an error if either participant id is empty.
    pub fn join_room(&self, sender_id: &str, receiver_id: &str) -> Result<ChannelKey, ChannelError> {
        self.router
            .channels()
            .join(self.handle.id(), sender_id, receiver_id)
    }

    /// Close the connection and remove it from every registry.
    pub fn close(mut self) {
        self.shut();
    }

    fn shut(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let id = self.handle.id().clone();

        self.router.channels().leave_all(&id);
        self.router.connections().remove(&id);
        let removed = self.router.presence().release(&id);
        self.state = ConnectionState::Closed;

        debug!(connection = %id, unregistered = ?removed, "Connection closed");
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        self.shut();
    }
}
