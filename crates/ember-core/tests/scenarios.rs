//! End-to-end relay scenarios driven through the lifecycle and router.

use ember_core::{
    BurnConfig, BurnPolicy, ConnectionHandle, ConnectionLifecycle, MemoryStore, MessageRouter,
    MessageStore, NewMessage, RouterConfig, RoutingMode,
};
use ember_protocol::{ChatMessage, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Client {
    conn: ConnectionLifecycle,
    rx: UnboundedReceiver<ServerEvent>,
}

impl Client {
    fn connect(router: &Arc<MessageRouter>, id: &str) -> Self {
        let (handle, rx) = ConnectionHandle::new(id.into());
        Self {
            conn: ConnectionLifecycle::open(router.clone(), handle),
            rx,
        }
    }

    fn login(router: &Arc<MessageRouter>, id: &str, user: &str) -> Self {
        let mut client = Self::connect(router, id);
        client.conn.login(user);
        client
    }

    fn events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn received(&mut self) -> Vec<ChatMessage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn burnt(&mut self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MessageBurnt(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

fn relay(store: Arc<MemoryStore>, policy: BurnPolicy) -> Arc<MessageRouter> {
    let config = RouterConfig {
        routing: RoutingMode::Direct,
        burn: BurnConfig {
            policy,
            delay: Duration::from_secs(10),
            ..BurnConfig::default()
        },
    };
    Arc::new(MessageRouter::new(store, config))
}

#[tokio::test(start_paused = true)]
async fn view_triggered_burn_reaches_both_participants() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnView);
    let mut alice = Client::login(&router, "a", "alice");
    let mut bob = Client::login(&router, "b", "bob");

    let delivery = router
        .send(alice.conn.id(), NewMessage::new("alice", "bob", "secret").ephemeral())
        .await
        .unwrap();
    let id = delivery.message.id;

    let to_alice = alice.received();
    let to_bob = bob.received();
    assert_eq!(to_alice.len(), 1);
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_alice[0].id, id);
    assert_eq!(to_bob[0].id, id);
    assert!(to_bob[0].is_burn);

    // Nothing burns until bob has seen it.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(store.contains(id));

    assert!(router.message_seen(id).await);
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(alice.burnt(), vec![id]);
    assert_eq!(bob.burnt(), vec![id]);
    let history = router.history("alice", "bob").await.unwrap();
    assert!(history.iter().all(|m| m.id != id));
}

#[tokio::test(start_paused = true)]
async fn send_triggered_burn_fires_once() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnSend);
    let mut alice = Client::login(&router, "a", "alice");
    let mut bob = Client::login(&router, "b", "bob");

    let burning = router
        .send(alice.conn.id(), NewMessage::new("alice", "bob", "gone soon").ephemeral())
        .await
        .unwrap();
    let lasting = router
        .send(alice.conn.id(), NewMessage::new("alice", "bob", "stays"))
        .await
        .unwrap();
    assert!(burning.burn_armed);
    assert!(!lasting.burn_armed);

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(alice.burnt(), vec![burning.message.id]);
    assert_eq!(bob.burnt(), vec![burning.message.id]);
    assert!(!store.contains(burning.message.id));
    assert!(store.contains(lasting.message.id));
}

#[tokio::test]
async fn offline_recipient_reads_history_after_reconnect() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnSend);
    let alice = Client::login(&router, "a", "alice");

    let sent = router
        .send(alice.conn.id(), NewMessage::new("alice", "bob", "while you were out").with_cipher("AES"))
        .await
        .unwrap()
        .message;

    let _bob = Client::login(&router, "b", "bob");
    let history = router.history("bob", "alice").await.unwrap();

    assert_eq!(history.len(), 1);
    assert_eq!(history[0], sent);
    assert_eq!(history[0].text, "while you were out");
    assert_eq!(history[0].cipher_type, "AES");
}

#[tokio::test]
async fn second_login_replaces_first() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnSend);
    let mut first_tab = Client::login(&router, "x", "u1");
    let mut second_tab = Client::login(&router, "y", "u1");
    let sender = Client::login(&router, "s", "u2");

    assert_eq!(router.presence().count(), 2);
    assert_eq!(router.presence().lookup("u1").unwrap().id().as_str(), "y");

    router
        .send(sender.conn.id(), NewMessage::new("u2", "u1", "hello"))
        .await
        .unwrap();
    assert!(first_tab.received().is_empty());
    assert_eq!(second_tab.received().len(), 1);

    // The replaced tab closing must not take u1 offline.
    drop(first_tab);
    assert!(router.presence().is_online("u1"));
}

#[tokio::test]
async fn empty_text_is_rejected_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnSend);
    let mut alice = Client::login(&router, "a", "alice");
    let mut bob = Client::login(&router, "b", "bob");

    assert!(router
        .send(alice.conn.id(), NewMessage::new("alice", "bob", ""))
        .await
        .is_err());

    assert!(store.is_empty());
    assert!(alice.received().is_empty());
    assert!(bob.received().is_empty());
    assert!(store.history("alice", "bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn delivery_order_matches_persistence_order() {
    let store = Arc::new(MemoryStore::new());
    let router = relay(store.clone(), BurnPolicy::OnSend);
    let alice = Client::login(&router, "a", "alice");
    let mut bob = Client::login(&router, "b", "bob");

    for i in 0..20 {
        router
            .send(alice.conn.id(), NewMessage::new("alice", "bob", format!("m{i}")))
            .await
            .unwrap();
    }

    let received: Vec<u64> = bob.received().into_iter().map(|m| m.id).collect();
    let stored: Vec<u64> = store
        .history("alice", "bob")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(received, stored);
}
