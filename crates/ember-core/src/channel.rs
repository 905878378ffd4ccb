//! Two-party channels.
//!
//! A channel groups every connection that joined a conversation. Channels
//! are keyed by the unordered pair of participants, so either side joining
//! lands in the same channel.

use crate::connection::ConnectionId;
use crate::message::UserId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Separator between the two ids in a channel's display name.
pub const CHANNEL_SEPARATOR: char = '_';

/// Channel errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// One of the participant ids was empty.
    #[error("Channel participants must be non-empty")]
    EmptyParticipant,
}

/// Canonical key of a conversation: the participant ids in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    low: UserId,
    high: UserId,
}

impl ChannelKey {
    /// Key for the conversation between `a` and `b`, in either order.
    #[must_use]
    pub fn between(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    /// Like [`ChannelKey::between`], rejecting empty ids.
    ///
    /// # Errors
    ///
    /// Returns an error if either id is empty.
    pub fn try_between(a: &str, b: &str) -> Result<Self, ChannelError> {
        if a.is_empty() || b.is_empty() {
            return Err(ChannelError::EmptyParticipant);
        }
        Ok(Self::between(a, b))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.low, CHANNEL_SEPARATOR, self.high)
    }
}

/// Members of one conversation channel.
#[derive(Debug)]
struct Channel {
    members: HashSet<ConnectionId>,
}

/// All channels, created lazily on first join.
#[derive(Default)]
pub struct ChannelDirectory {
    channels: DashMap<ChannelKey, Channel>,
    /// Channels each connection joined, for cleanup on close.
    memberships: DashMap<ConnectionId, HashSet<ChannelKey>>,
}

impl ChannelDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels with at least one member.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Join a connection to the channel between `a` and `b`.
    ///
    /// Returns the channel key. Joining twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if either participant id is empty.
    pub fn join(
        &self,
        connection: &ConnectionId,
        a: &str,
        b: &str,
    ) -> Result<ChannelKey, ChannelError> {
        let key = ChannelKey::try_between(a, b)?;

        let mut channel = self.channels.entry(key.clone()).or_insert_with(|| {
            debug!(channel = %key, "Creating channel");
            Channel {
                members: HashSet::new(),
            }
        });
        if channel.members.insert(connection.clone()) {
            debug!(
                channel = %key,
                connection = %connection,
                members = channel.members.len(),
                "Joined channel"
            );
        }
        drop(channel);

        self.memberships
            .entry(connection.clone())
            .or_default()
            .insert(key.clone());

        Ok(key)
    }

    /// Connections joined to a channel.
    #[must_use]
    pub fn members(&self, key: &ChannelKey) -> Vec<ConnectionId> {
        self.channels
            .get(key)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every channel it joined.
    ///
    /// Channels left without members are deleted.
    pub fn leave_all(&self, connection: &ConnectionId) {
        let Some((_, keys)) = self.memberships.remove(connection) else {
            return;
        };

        for key in keys {
            let now_empty = match self.channels.get_mut(&key) {
                Some(mut channel) => {
                    channel.members.remove(connection);
                    channel.members.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.channels.remove_if(&key, |_, c| c.members.is_empty());
                debug!(channel = %key, "Deleted empty channel");
            }
        }

        debug!(connection = %connection, "Left all channels");
    }
}
