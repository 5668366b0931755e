//! Chat router integration tests
//!
//! These tests drive the router with real mpsc-backed handles and verify:
//! - Join flow and key announcement
//! - Shared-secret agreement between two users
//! - Error reporting and silent drops
//! - Disconnect cleanup
//! - Broadcast fan-out and failure isolation

use dhchat_server::{ChatRouter, ClientHandle, ConnId};
use dhchat_shared::envelope::{
    inbound_json, ERROR_PREFIX, KEYS_QUEUE, PUBLIC_KEY_PREFIX, PUBLIC_TOPIC,
    SHARED_SECRET_PREFIX, SYSTEM_SENDER,
};
use dhchat_shared::{
    compute_shared_secret, content_value, decode_hex, ChatEnvelope, Destination, InboundPayload,
    MessageType, OutboundFrame,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

struct Client {
    id: ConnId,
    rx: mpsc::Receiver<String>,
}

impl Client {
    fn connect(router: &ChatRouter) -> Self {
        Self::connect_with_capacity(router, 32)
    }

    fn connect_with_capacity(router: &ChatRouter, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let id = router.connect(ClientHandle::new(tx, Duration::from_millis(50)));
        Client { id, rx }
    }

    fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).expect("outbound frame is valid JSON"));
        }
        frames
    }
}

async fn send(
    router: &ChatRouter,
    client: &Client,
    destination: Destination,
    sender: Option<&str>,
    content: Option<&str>,
) {
    let payload = InboundPayload {
        sender: sender.map(str::to_string),
        content: content.map(str::to_string),
    };
    let raw = inbound_json(destination, &payload).unwrap();
    router.dispatch(client.id, &raw).await;
}

async fn join(router: &ChatRouter, client: &Client, username: &str) {
    send(router, client, Destination::AddUser, Some(username), None).await;
}

/// Join and return the announced public value as hex
async fn join_and_get_public(router: &ChatRouter, client: &mut Client, username: &str) -> String {
    join(router, client, username).await;
    let frames = client.drain();
    let key = frames
        .iter()
        .find(|f| f.destination == KEYS_QUEUE)
        .expect("public key announcement");
    content_value(&key.payload.content).unwrap().to_string()
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_add_user_announces_key_and_broadcasts_join() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    let mut watcher = Client::connect(&router);

    join(&router, &alice, "alice").await;

    let frames = alice.drain();
    assert_eq!(frames.len(), 2);

    let key = &frames[0];
    assert_eq!(key.destination, KEYS_QUEUE);
    assert_eq!(key.payload.kind, MessageType::KeyExchange);
    assert_eq!(key.payload.sender, "alice");
    assert!(key.payload.content.starts_with(PUBLIC_KEY_PREFIX));
    let hex = content_value(&key.payload.content).unwrap();
    assert!(!hex.is_empty() && hex.len() <= 512);
    assert_eq!(hex, hex.to_lowercase());

    let joined = &frames[1];
    assert_eq!(joined.destination, PUBLIC_TOPIC);
    assert_eq!(joined.payload.kind, MessageType::Join);
    assert_eq!(joined.payload.content, "alice joined the chat");

    let seen = watcher.drain();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload.kind, MessageType::Join);
    assert_eq!(seen[0].payload.content, "alice joined the chat");

    // Stored public value matches the announcement
    let stored = router.keys().get_private("alice").unwrap();
    assert_eq!(decode_hex(hex).unwrap(), stored.public);
}

#[tokio::test]
async fn test_rejoin_replaces_keypair() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);

    let first = join_and_get_public(&router, &mut alice, "alice").await;
    let old_private = router.keys().get_private("alice").unwrap().private;
    let second = join_and_get_public(&router, &mut alice, "alice").await;

    assert_ne!(first, second);
    let current = router.keys().get_private("alice").unwrap();
    assert_ne!(current.private, old_private);
    assert_eq!(router.keys().len(), 1);
}

#[tokio::test]
async fn test_add_user_without_sender_is_dropped() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);

    send(&router, &alice, Destination::AddUser, None, Some("hi")).await;

    assert!(alice.drain().is_empty());
    assert!(router.sessions().lookup_username(alice.id).is_none());
    assert!(router.keys().is_empty());
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn test_send_message_broadcasts_as_bound_user() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    let mut bob = Client::connect(&router);
    join(&router, &alice, "alice").await;
    alice.drain();
    bob.drain();

    send(&router, &alice, Destination::SendMessage, Some("mallory"), Some("hello")).await;

    for frames in [alice.drain(), bob.drain()] {
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].destination, PUBLIC_TOPIC);
        assert_eq!(frames[0].payload.kind, MessageType::Chat);
        assert_eq!(frames[0].payload.sender, "alice");
        assert_eq!(frames[0].payload.content, "hello");
    }
}

#[tokio::test]
async fn test_requests_before_join_are_dropped() {
    let router = ChatRouter::new();
    let mut stranger = Client::connect(&router);
    let mut other = Client::connect(&router);

    send(&router, &stranger, Destination::SendMessage, None, Some("hello")).await;
    send(&router, &stranger, Destination::ExchangeKey, None, Some("Public Key: ab")).await;

    assert!(stranger.drain().is_empty());
    assert!(other.drain().is_empty());
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    join(&router, &alice, "alice").await;
    alice.drain();

    for raw in [
        "not json",
        "{}",
        r#"{"destination": "/app/chat.sendMessage"}"#,
        r#"{"destination": "/app/chat.sendMessage", "payload": null}"#,
        r#"{"destination": "/app/chat.unknown", "payload": {"content": "x"}}"#,
        r#"{"payload": {"content": "x"}}"#,
        r#"{"destination": "/app/chat.addUser", "payload": {"sender": 5}}"#,
    ] {
        router.dispatch(alice.id, raw).await;
    }

    assert!(alice.drain().is_empty());
    assert_eq!(router.sessions().lookup_username(alice.id).as_deref(), Some("alice"));
}

// ============================================================================
// Key exchange
// ============================================================================

#[tokio::test]
async fn test_exchange_key_returns_secret_only_to_sender() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    let mut bob = Client::connect(&router);

    let alice_pub = join_and_get_public(&router, &mut alice, "alice").await;
    let bob_pub = join_and_get_public(&router, &mut bob, "bob").await;
    alice.drain();

    let content = format!("Public Key: {}", bob_pub);
    send(&router, &alice, Destination::ExchangeKey, None, Some(&content)).await;

    let frames = alice.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].destination, KEYS_QUEUE);
    assert_eq!(frames[0].payload.kind, MessageType::KeyExchange);
    assert_eq!(frames[0].payload.sender, SYSTEM_SENDER);
    assert!(frames[0].payload.content.starts_with(SHARED_SECRET_PREFIX));
    assert!(bob.drain().is_empty());

    // Bob derives the same value from Alice's public key
    let content = format!("Public Key: {}", alice_pub);
    send(&router, &bob, Destination::ExchangeKey, None, Some(&content)).await;
    let bob_frames = bob.drain();
    assert_eq!(bob_frames.len(), 1);
    assert_eq!(
        content_value(&frames[0].payload.content),
        content_value(&bob_frames[0].payload.content)
    );

    // And it matches the engine applied to the stored keys
    let alice_pair = router.keys().get_private("alice").unwrap();
    let expected = compute_shared_secret(&alice_pair.private, &decode_hex(&bob_pub).unwrap());
    assert_eq!(
        decode_hex(content_value(&frames[0].payload.content).unwrap()).unwrap(),
        expected
    );
}

#[tokio::test]
async fn test_exchange_key_without_colon_is_dropped() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    let mut bob = Client::connect(&router);
    join(&router, &alice, "alice").await;
    alice.drain();
    bob.drain();

    send(&router, &alice, Destination::ExchangeKey, None, Some("foo")).await;
    send(&router, &alice, Destination::ExchangeKey, None, Some("a:b:c")).await;

    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_exchange_key_invalid_hex_reports_error() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    let mut bob = Client::connect(&router);
    join(&router, &alice, "alice").await;
    alice.drain();
    bob.drain();

    send(
        &router,
        &alice,
        Destination::ExchangeKey,
        None,
        Some("Public Key: notacryptohexvalue!"),
    )
    .await;

    let frames = alice.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].destination, KEYS_QUEUE);
    assert_eq!(frames[0].payload.kind, MessageType::KeyExchange);
    assert_eq!(
        frames[0].payload.content,
        "Error: Invalid key format. Please copy the full key without any special characters."
    );
    assert!(bob.drain().is_empty());

    // Connection is still usable
    send(&router, &alice, Destination::SendMessage, None, Some("still here")).await;
    assert_eq!(alice.drain().len(), 1);
}

#[tokio::test]
async fn test_exchange_key_out_of_range_reports_error() {
    let router = ChatRouter::new();
    let mut alice = Client::connect(&router);
    join(&router, &alice, "alice").await;
    alice.drain();

    send(&router, &alice, Destination::ExchangeKey, None, Some("Public Key: 0")).await;

    let frames = alice.drain();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].payload.content.starts_with(ERROR_PREFIX));
}

#[tokio::test]
async fn test_exchange_key_after_eviction_reports_missing_keypair() {
    let router = ChatRouter::new();
    let mut first = Client::connect(&router);
    let second = Client::connect(&router);
    let mut peer = Client::connect(&router);

    join(&router, &first, "alice").await;
    join(&router, &second, "alice").await;
    let peer_pub = join_and_get_public(&router, &mut peer, "bob").await;

    // Last disconnect wins: the shared name's keypair goes with it
    router.disconnect(second.id).await;
    assert!(router.keys().get_private("alice").is_none());
    first.drain();

    let content = format!("Public Key: {}", peer_pub);
    send(&router, &first, Destination::ExchangeKey, None, Some(&content)).await;

    let frames = first.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.content, "Error: User alice has no private key");
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_broadcasts_leave_and_evicts_keys() {
    let router = ChatRouter::new();
    let alice = Client::connect(&router);
    let mut bob = Client::connect(&router);
    join(&router, &alice, "alice").await;
    bob.drain();

    router.disconnect(alice.id).await;

    let frames = bob.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].destination, PUBLIC_TOPIC);
    assert_eq!(frames[0].payload.kind, MessageType::Leave);
    assert_eq!(frames[0].payload.sender, "alice");
    assert_eq!(frames[0].payload.content, "alice left the chat");
    assert!(router.keys().get_private("alice").is_none());
    assert!(router.sessions().handle(alice.id).is_none());

    // Second disconnect is a no-op
    router.disconnect(alice.id).await;
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_rejoin_during_leave_fanout_keeps_new_keypair() {
    let router = ChatRouter::new();
    let leaving = Client::connect(&router);
    let rejoining = Client::connect(&router);
    let stalled = Client::connect_with_capacity(&router, 1);

    join(&router, &leaving, "alice").await;
    // Keep the stalled client's queue full so every fan-out waits on it
    router
        .send_to_user(stalled.id, PUBLIC_TOPIC, ChatEnvelope::chat("x", "fill"))
        .await;

    tokio::join!(
        router.disconnect(leaving.id),
        join(&router, &rejoining, "alice"),
    );

    assert!(router.keys().get_private("alice").is_some());
    assert_eq!(
        router.sessions().lookup_username(rejoining.id).as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn test_disconnect_before_join_is_silent() {
    let router = ChatRouter::new();
    let stranger = Client::connect(&router);
    let mut bob = Client::connect(&router);

    router.disconnect(stranger.id).await;

    assert!(bob.drain().is_empty());
    assert_eq!(router.sessions().len(), 1);
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_each_connection_once() {
    let router = ChatRouter::new();
    let mut clients: Vec<Client> = (0..6).map(|_| Client::connect(&router)).collect();

    let reached = router
        .broadcast_to_all(PUBLIC_TOPIC, ChatEnvelope::chat("alice", "hi"))
        .await;

    assert_eq!(reached, 6);
    for client in clients.iter_mut() {
        assert_eq!(client.drain().len(), 1);
    }
}

#[tokio::test]
async fn test_broadcast_isolates_failed_recipients() {
    let router = ChatRouter::new();
    let mut healthy = Client::connect(&router);
    let closed = Client::connect(&router);
    let stalled = Client::connect_with_capacity(&router, 1);

    drop(closed.rx);
    // Fill the stalled client's queue so the next send times out
    router
        .send_to_user(stalled.id, PUBLIC_TOPIC, ChatEnvelope::chat("x", "fill"))
        .await;

    let reached = router
        .broadcast_to_all(PUBLIC_TOPIC, ChatEnvelope::chat("alice", "hi"))
        .await;

    assert_eq!(reached, 1);
    assert_eq!(healthy.drain().len(), 1);
    // Failed handles stay registered until the transport closes
    assert_eq!(router.sessions().len(), 3);
    drop(stalled);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_through_shared_router() {
    const USERS: usize = 16;
    let router = Arc::new(ChatRouter::new());

    let tasks: Vec<_> = (0..USERS)
        .map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(USERS * 2 + 4);
                let id = router.connect(ClientHandle::new(tx, Duration::from_secs(5)));
                let client = Client { id, rx };
                join(&router, &client, &format!("user{}", i)).await;
                client
            })
        })
        .collect();

    let mut clients = Vec::with_capacity(USERS);
    for task in tasks {
        clients.push(task.await.expect("join task panicked"));
    }

    assert_eq!(router.keys().len(), USERS);
    assert_eq!(router.sessions().joined_count(), USERS);
    for (i, client) in clients.iter_mut().enumerate() {
        let frames = client.drain();
        let keys: Vec<_> = frames
            .iter()
            .filter(|f| f.destination == KEYS_QUEUE)
            .collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].payload.sender, format!("user{}", i));
        let joins: Vec<_> = frames
            .iter()
            .filter(|f| f.payload.kind == MessageType::Join)
            .map(|f| f.payload.sender.clone())
            .collect();
        let unique: HashSet<_> = joins.iter().collect();
        assert_eq!(joins.len(), unique.len());
        assert!(joins.contains(&format!("user{}", i)));
    }
}
