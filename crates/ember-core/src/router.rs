//! Private message router for Ember.
//!
//! The router persists a message, resolves who should receive it, delivers
//! it, and arms the burn timer when the message is ephemeral. Delivery never
//! happens before the store has acknowledged the write.

use crate::burn::{BurnConfig, BurnPolicy, BurnScheduler};
use crate::channel::{ChannelDirectory, ChannelKey};
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionTable};
use crate::message::{Message, MessageId, NewMessage};
use crate::presence::PresenceRegistry;
use crate::store::{MessageStore, StoreError};
use dashmap::DashMap;
use ember_protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// A required field was missing. Nothing was persisted.
    #[error("Invalid message: {0}")]
    Validation(&'static str),

    /// The store rejected the write. Nothing was delivered.
    #[error("Failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}

/// How a message finds its recipient's connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// The receiver's registered connection (last login wins).
    #[default]
    Direct,
    /// Every connection joined to the conversation channel.
    Channel,
}

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub routing: RoutingMode,
    pub burn: BurnConfig,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The persisted message.
    pub message: Message,
    /// Connections the message was queued for, including the echo.
    pub recipients: usize,
    /// Whether a burn timer was armed by this send.
    pub burn_armed: bool,
}

/// The central message router.
pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    connections: Arc<ConnectionTable>,
    presence: Arc<PresenceRegistry>,
    channels: Arc<ChannelDirectory>,
    scheduler: BurnScheduler,
    /// One lock per conversation, held from persistence through delivery.
    conversations: DashMap<ChannelKey, Arc<Mutex<()>>>,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a router over a store.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: RouterConfig) -> Self {
        info!(routing = ?config.routing, "Creating message router");

        let connections = Arc::new(ConnectionTable::new());
        let presence = Arc::new(PresenceRegistry::new(connections.clone()));
        let channels = Arc::new(ChannelDirectory::new());
        let scheduler = BurnScheduler::new(
            store.clone(),
            connections.clone(),
            channels.clone(),
            config.burn.clone(),
        );

        Self {
            store,
            connections,
            presence,
            channels,
            scheduler,
            conversations: DashMap::new(),
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The persistence gateway.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Every live connection.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    /// The presence registry.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// The conversation channels.
    #[must_use]
    pub fn channels(&self) -> &Arc<ChannelDirectory> {
        &self.channels
    }

    /// The burn scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &BurnScheduler {
        &self.scheduler
    }

    /// Persist and deliver a message sent from `origin`.
    ///
    /// The persisted message goes to the recipient's connections and is
    /// echoed to `origin`. Under [`BurnPolicy::OnSend`] an ephemeral message
    /// has its burn timer armed once delivery is done.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Validation`] if sender, receiver or text is
    /// empty, and [`RouterError::Persistence`] if the store fails. In both
    /// cases nothing is delivered.
    pub async fn send(
        &self,
        origin: &ConnectionId,
        draft: NewMessage,
    ) -> Result<Delivery, RouterError> {
        draft.validate().map_err(RouterError::Validation)?;

        let key = ChannelKey::between(&draft.sender_id, &draft.receiver_id);
        let lock = self.conversation_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.persist_and_deliver(origin, &key, draft).await
        };
        drop(lock);
        self.conversations
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn persist_and_deliver(
        &self,
        origin: &ConnectionId,
        key: &ChannelKey,
        draft: NewMessage,
    ) -> Result<Delivery, RouterError> {
        let message = self.store.create_message(draft).await.map_err(|e| {
            warn!(connection = %origin, channel = %key, error = %e, "Persisting message failed");
            RouterError::from(e)
        })?;

        let event = ServerEvent::ReceiveMessage(message.to_wire());
        let recipients = self
            .resolve_targets(origin, key, &message)
            .into_iter()
            .filter(|handle| handle.send(event.clone()))
            .count();

        let burn_armed =
            self.scheduler.config().policy == BurnPolicy::OnSend && self.scheduler.arm(&message);

        debug!(
            connection = %origin,
            message_id = message.id,
            channel = %key,
            recipients,
            burn_armed,
            "Message delivered"
        );

        Ok(Delivery {
            message,
            recipients,
            burn_armed,
        })
    }

    /// Handle a `message_seen` acknowledgement.
    ///
    /// Under [`BurnPolicy::OnView`] this arms the burn timer of a known
    /// ephemeral message. Unknown ids, non-ephemeral messages and the
    /// send-triggered policy are ignored. Returns `true` if a timer was armed.
    pub async fn message_seen(&self, id: MessageId) -> bool {
        if self.scheduler.config().policy != BurnPolicy::OnView {
            trace!(message_id = id, "Seen acknowledgement ignored under send policy");
            return false;
        }

        match self.store.find_message(id).await {
            Ok(Some(message)) if message.is_ephemeral => self.scheduler.arm(&message),
            Ok(_) => {
                trace!(message_id = id, "Seen acknowledgement for unknown or lasting message");
                false
            }
            Err(e) => {
                warn!(message_id = id, error = %e, "Lookup for seen acknowledgement failed");
                false
            }
        }
    }

    /// History of the conversation between `a` and `b`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>, RouterError> {
        Ok(self.store.history(a, b).await?)
    }

    fn conversation_lock(&self, key: &ChannelKey) -> Arc<Mutex<()>> {
        self.conversations
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolve_targets(
        &self,
        origin: &ConnectionId,
        key: &ChannelKey,
        message: &Message,
    ) -> Vec<ConnectionHandle> {
        let mut candidates: Vec<ConnectionHandle> = match self.config.routing {
            RoutingMode::Direct => self.presence.lookup(&message.receiver_id).into_iter().collect(),
            RoutingMode::Channel => self
                .channels
                .members(key)
                .into_iter()
                .filter_map(|id| self.connections.get(&id))
                .collect(),
        };
        if candidates.is_empty() {
            trace!(receiver = %message.receiver_id, "Recipient unreachable, message kept for history");
        }
        candidates.extend(self.connections.get(origin));

        let mut seen = HashSet::new();
        candidates.retain(|handle| seen.insert(handle.id().clone()));
        candidates
    }
}
