//! Burn scheduling.
//!
//! A burn message is deleted a fixed delay after it is armed. Arming happens
//! either when the message is delivered or when a recipient reports having
//! seen it, depending on [`BurnPolicy`]. Each armed timer is an independent
//! task; nothing survives a process restart.

use crate::channel::{ChannelDirectory, ChannelKey};
use crate::connection::{ConnectionHandle, ConnectionTable};
use crate::message::{now_millis, Message, MessageId, UserId};
use crate::store::MessageStore;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ember_protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Reference delay between arming and deletion.
pub const DEFAULT_BURN_DELAY: Duration = Duration::from_secs(10);

/// When a burn timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BurnPolicy {
    /// As soon as the message has been delivered.
    #[default]
    #[serde(rename = "send")]
    OnSend,
    /// When a `message_seen` acknowledgement names the message.
    #[serde(rename = "view")]
    OnView,
}

/// Who is told that a message burnt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BurnAudience {
    /// Every session of both participants, plus the conversation channel.
    #[default]
    Participants,
    /// Every live connection.
    Everyone,
}

/// Burn scheduler configuration.
#[derive(Debug, Clone)]
pub struct BurnConfig {
    pub policy: BurnPolicy,
    pub delay: Duration,
    pub audience: BurnAudience,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            policy: BurnPolicy::default(),
            delay: DEFAULT_BURN_DELAY,
            audience: BurnAudience::default(),
        }
    }
}

/// An armed deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnTimer {
    pub message_id: MessageId,
    /// Milliseconds since the Unix epoch.
    pub fire_at: u64,
    pub policy: BurnPolicy,
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

struct Armed {
    timer: BurnTimer,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    connections: Arc<ConnectionTable>,
    channels: Arc<ChannelDirectory>,
    config: BurnConfig,
    /// Stays occupied until the deletion has finished.
    timers: DashMap<MessageId, Armed>,
    /// Ids deleted by a fired timer. Never armed again.
    burnt: DashSet<MessageId>,
}

/// Schedules deletion of burn messages.
///
/// At most one timer exists per message id; arming an armed id is a no-op,
/// and so is arming an id that has already burnt.
#[derive(Clone)]
pub struct BurnScheduler {
    inner: Arc<Inner>,
}

impl BurnScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        connections: Arc<ConnectionTable>,
        channels: Arc<ChannelDirectory>,
        config: BurnConfig,
    ) -> Self {
        info!(
            policy = ?config.policy,
            delay_ms = config.delay.as_millis() as u64,
            audience = ?config.audience,
            "Creating burn scheduler"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                connections,
                channels,
                config,
                timers: DashMap::new(),
                burnt: DashSet::new(),
            }),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &BurnConfig {
        &self.inner.config
    }

    /// Arm the deletion timer for a burn message.
    ///
    /// Returns `true` if a new timer was armed. Non-burn messages, armed
    /// ids and burnt ids are ignored.
    pub fn arm(&self, message: &Message) -> bool {
        if !message.is_ephemeral {
            return false;
        }

        match self.inner.timers.entry(message.id) {
            Entry::Occupied(_) => {
                trace!(message_id = message.id, "Burn timer already armed");
                false
            }
            Entry::Vacant(_) if self.inner.burnt.contains(&message.id) => {
                trace!(message_id = message.id, "Message already burnt");
                false
            }
            Entry::Vacant(slot) => {
                let delay = self.inner.config.delay;
                let timer = BurnTimer {
                    message_id: message.id,
                    fire_at: now_millis() + delay.as_millis() as u64,
                    policy: self.inner.config.policy,
                    sender_id: message.sender_id.clone(),
                    receiver_id: message.receiver_id.clone(),
                };

                let inner = Arc::clone(&self.inner);
                let id = message.id;
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.fire(id).await;
                });

                slot.insert(Armed { timer, task });
                info!(message_id = id, delay_ms = delay.as_millis() as u64, "Burn timer armed");
                true
            }
        }
    }

    /// Check if a timer is armed for a message.
    #[must_use]
    pub fn is_armed(&self, id: MessageId) -> bool {
        self.inner.timers.contains_key(&id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.timers.len()
    }

    /// Armed timers, soonest first.
    #[must_use]
    pub fn pending(&self) -> Vec<BurnTimer> {
        let mut timers: Vec<BurnTimer> = self
            .inner
            .timers
            .iter()
            .map(|a| a.timer.clone())
            .collect();
        timers.sort_by_key(|t| (t.fire_at, t.message_id));
        timers
    }

    /// Disarm a timer without deleting the message.
    ///
    /// Returns `true` if a timer was armed.
    pub fn cancel(&self, id: MessageId) -> bool {
        match self.inner.timers.remove(&id) {
            Some((_, armed)) => {
                armed.task.abort();
                debug!(message_id = id, "Burn timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort every armed timer. Their messages are not deleted.
    ///
    /// Returns the number of deletions that were dropped.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<MessageId> = self.inner.timers.iter().map(|a| *a.key()).collect();
        let dropped = ids.into_iter().filter(|id| self.cancel(*id)).count();
        if dropped > 0 {
            warn!(dropped, "Burn scheduler stopped with pending deletions");
        }
        dropped
    }
}

impl Inner {
    async fn fire(&self, id: MessageId) {
        let Some(timer) = self.timers.get(&id).map(|armed| armed.timer.clone()) else {
            return;
        };

        let deleted = self.store.delete_message(id).await;
        if deleted.is_ok() {
            self.burnt.insert(id);
        }
        self.timers.remove(&id);

        match deleted {
            Ok(true) => {}
            Ok(false) => debug!(message_id = id, "Burnt message was already gone"),
            Err(e) => {
                error!(message_id = id, error = %e, "Failed to delete burn message");
                return;
            }
        }

        let event = ServerEvent::MessageBurnt(id);
        let notified = match self.config.audience {
            BurnAudience::Everyone => self.connections.broadcast(&event),
            BurnAudience::Participants => self
                .participant_targets(&timer)
                .into_iter()
                .filter(|handle| handle.send(event.clone()))
                .count(),
        };

        info!(message_id = id, notified, "Message burnt");
    }

    fn participant_targets(&self, timer: &BurnTimer) -> Vec<ConnectionHandle> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        let sessions = self
            .connections
            .sessions_of(&[timer.sender_id.as_str(), timer.receiver_id.as_str()]);
        let key = ChannelKey::between(&timer.sender_id, &timer.receiver_id);
        let joined = self
            .channels
            .members(&key)
            .into_iter()
            .filter_map(|id| self.connections.get(&id));

        for handle in sessions.into_iter().chain(joined) {
            if seen.insert(handle.id().clone()) {
                targets.push(handle);
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NewMessage;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        store: Arc<MemoryStore>,
        connections: Arc<ConnectionTable>,
        channels: Arc<ChannelDirectory>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                connections: Arc::new(ConnectionTable::new()),
                channels: Arc::new(ChannelDirectory::new()),
            }
        }

        fn scheduler(&self, config: BurnConfig) -> BurnScheduler {
            BurnScheduler::new(
                self.store.clone(),
                self.connections.clone(),
                self.channels.clone(),
                config,
            )
        }

        fn session(&self, id: &str, user: Option<&str>) -> UnboundedReceiver<ServerEvent> {
            let (handle, rx) = ConnectionHandle::new(id.into());
            self.connections.insert(handle);
            if let Some(user) = user {
                self.connections.identify(&id.into(), user);
            }
            rx
        }

        async fn persist(&self, draft: NewMessage) -> Message {
            self.store.create_message(draft).await.unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig::default());
        let mut alice = fixture.session("a1", Some("alice"));
        let mut bob = fixture.session("b1", Some("bob"));
        let mut carol = fixture.session("c1", Some("carol"));

        let message = fixture.persist(NewMessage::new("alice", "bob", "x").ephemeral()).await;
        assert!(scheduler.arm(&message));
        assert!(scheduler.is_armed(message.id));

        tokio::time::sleep(DEFAULT_BURN_DELAY - Duration::from_millis(1)).await;
        assert!(fixture.store.contains(message.id));
        assert!(alice.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!fixture.store.contains(message.id));
        assert!(!scheduler.is_armed(message.id));
        assert_eq!(alice.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));
        assert!(carol.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_twice_is_noop() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig::default());
        let mut alice = fixture.session("a1", Some("alice"));

        let message = fixture.persist(NewMessage::new("alice", "bob", "x").ephemeral()).await;
        assert!(scheduler.arm(&message));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!scheduler.arm(&message));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(alice.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));
        // Exactly one notification
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burnt_id_cannot_be_rearmed() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig::default());
        let mut alice = fixture.session("a1", Some("alice"));

        let message = fixture.persist(NewMessage::new("alice", "bob", "x").ephemeral()).await;
        assert!(scheduler.arm(&message));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(alice.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));

        // A stale copy of the record must not start a second burn.
        assert!(!scheduler.arm(&message));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ephemeral_never_armed() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig::default());
        let message = fixture.persist(NewMessage::new("alice", "bob", "keep")).await;

        assert!(!scheduler.arm(&message));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(fixture.store.contains(message.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_deleted_still_notifies() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig::default());
        let mut bob = fixture.session("b1", Some("bob"));

        let message = fixture.persist(NewMessage::new("alice", "bob", "x").ephemeral()).await;
        scheduler.arm(&message);
        fixture.store.delete_message(message.id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(bob.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_everyone_audience_and_channel_members() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig {
            audience: BurnAudience::Everyone,
            ..BurnConfig::default()
        });
        let mut stranger = fixture.session("s1", None);

        let message = fixture.persist(NewMessage::new("alice", "bob", "x").ephemeral()).await;
        scheduler.arm(&message);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(stranger.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));

        let scheduler = fixture.scheduler(BurnConfig::default());
        let mut watcher = fixture.session("w1", None);
        fixture.channels.join(&"w1".into(), "bob", "alice").unwrap();
        let message = fixture.persist(NewMessage::new("alice", "bob", "y").ephemeral()).await;
        scheduler.arm(&message);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(watcher.try_recv().unwrap(), ServerEvent::MessageBurnt(message.id));
        assert!(stranger.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_shutdown() {
        let fixture = Fixture::new();
        let scheduler = fixture.scheduler(BurnConfig {
            delay: Duration::from_secs(1),
            ..BurnConfig::default()
        });

        let first = fixture.persist(NewMessage::new("a", "b", "1").ephemeral()).await;
        let second = fixture.persist(NewMessage::new("a", "b", "2").ephemeral()).await;
        scheduler.arm(&first);
        scheduler.arm(&second);

        let pending = scheduler.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_id, first.id);
        assert_eq!(pending[0].policy, BurnPolicy::OnSend);

        assert!(scheduler.cancel(first.id));
        assert!(!scheduler.cancel(first.id));
        assert_eq!(scheduler.shutdown(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fixture.store.contains(first.id));
        assert!(fixture.store.contains(second.id));
    }
}
