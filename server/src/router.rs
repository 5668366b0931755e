//! Chat protocol dispatch
//!
//! Each connection moves from "connected, no username" to "joined" on its
//! first add-user envelope. Requests that need a username are dropped before
//! that point. Broadcasts are unordered: recipients are reached concurrently
//! and in no particular order.

use dhchat_shared::envelope::{KEYS_QUEUE, PUBLIC_TOPIC};
use dhchat_shared::{
    compute_shared_secret, decode_hex, generate_keypair, parse_key_exchange,
    validate_public_value, ChatEnvelope, Destination, InboundFrame, InboundPayload,
    KeyAgreementError, OutboundFrame,
};
use futures::future::join_all;
use num_bigint::BigUint;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::keystore::UserKeyStore;
use crate::session::{ClientHandle, ConnId, SessionRegistry};

/// Why an inbound envelope did not complete
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("connection has no username")]
    NotJoined,

    #[error("key exchange content is not '<label>:<hex>'")]
    KeyFormat,

    #[error("Invalid key format. Please copy the full key without any special characters.")]
    InvalidKey(#[source] KeyAgreementError),

    #[error("Public key is out of range for this group")]
    KeyOutOfRange,

    #[error("User {0} has no private key")]
    MissingKeyPair(String),

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),

    #[error("key agreement task failed: {0}")]
    Internal(String),
}

impl RouterError {
    /// Whether the sender gets an error envelope back.
    /// Everything else is logged and dropped.
    pub fn reports_to_sender(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_) | Self::KeyOutOfRange | Self::MissingKeyPair(_) | Self::Internal(_)
        )
    }
}

/// Routes inbound envelopes over the shared session registry and key store
#[derive(Default)]
pub struct ChatRouter {
    sessions: SessionRegistry,
    keys: UserKeyStore,
}

impl ChatRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn keys(&self) -> &UserKeyStore {
        &self.keys
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register a new transport and return its connection id
    pub fn connect(&self, handle: ClientHandle) -> ConnId {
        let conn_id = self.sessions.next_conn_id();
        self.sessions.register(conn_id, handle);
        debug!(conn_id, "session registered");
        conn_id
    }

    /// Tear down a connection. A bound username is announced as leaving and
    /// its key pair evicted, even if another connection shares the name.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let Some((_, username)) = self.sessions.unregister(conn_id) else {
            return;
        };
        match username {
            Some(username) => {
                // Key pair goes before the LEAVE fan-out starts
                self.keys.remove(&username);
                info!(conn_id, username = %username, "user left");
                self.broadcast_to_all(PUBLIC_TOPIC, ChatEnvelope::leave(&username))
                    .await;
            }
            None => debug!(conn_id, "connection closed before joining"),
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Handle one inbound text frame. Never fails the connection.
    pub async fn dispatch(&self, conn_id: ConnId, raw: &str) {
        let Err(err) = self.handle_frame(conn_id, raw).await else {
            return;
        };
        let username = self.sessions.lookup_username(conn_id);
        let username = username.as_deref().unwrap_or("");

        match &err {
            RouterError::Malformed(_) | RouterError::UnknownDestination(_) => {
                warn!(conn_id, username, error = %err, "dropping envelope");
            }
            RouterError::NotJoined => {
                warn!(conn_id, "dropping request from connection without a username");
            }
            RouterError::KeyFormat => {
                warn!(conn_id, username, error = %err, "dropping key exchange");
            }
            RouterError::InvalidKey(_)
            | RouterError::KeyOutOfRange
            | RouterError::MissingKeyPair(_) => {
                warn!(conn_id, username, error = %err, "key exchange rejected");
            }
            RouterError::UnknownConnection(_) | RouterError::Internal(_) => {
                error!(conn_id, username, error = %err, "internal dispatch failure");
            }
        }

        if err.reports_to_sender() {
            self.send_to_user(conn_id, KEYS_QUEUE, ChatEnvelope::error(&err))
                .await;
        }
    }

    async fn handle_frame(&self, conn_id: ConnId, raw: &str) -> Result<(), RouterError> {
        let frame: InboundFrame =
            serde_json::from_str(raw).map_err(|e| RouterError::Malformed(e.to_string()))?;
        let destination = frame
            .destination
            .ok_or_else(|| RouterError::Malformed("missing destination".into()))?;
        let payload: InboundPayload = frame
            .payload
            .ok_or_else(|| RouterError::Malformed("missing payload".into()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| RouterError::Malformed(e.to_string()))
            })?;

        match Destination::parse(&destination) {
            Some(Destination::AddUser) => self.handle_add_user(conn_id, payload).await,
            Some(Destination::SendMessage) => self.handle_send_message(conn_id, payload).await,
            Some(Destination::ExchangeKey) => self.handle_exchange_key(conn_id, payload).await,
            None => Err(RouterError::UnknownDestination(destination)),
        }
    }

    fn require_joined(&self, conn_id: ConnId) -> Result<String, RouterError> {
        self.sessions
            .lookup_username(conn_id)
            .ok_or(RouterError::NotJoined)
    }

    async fn handle_add_user(
        &self,
        conn_id: ConnId,
        payload: InboundPayload,
    ) -> Result<(), RouterError> {
        let username = payload
            .sender
            .ok_or_else(|| RouterError::Malformed("add-user without sender".into()))?;
        if !self.sessions.bind_user(conn_id, &username) {
            return Err(RouterError::UnknownConnection(conn_id));
        }

        let pair = tokio::task::spawn_blocking(generate_keypair)
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))?;
        let announcement = ChatEnvelope::public_key(&username, &pair.public);
        self.keys.put(&username, pair);
        info!(conn_id, username = %username, "user joined");

        self.send_to_user(conn_id, KEYS_QUEUE, announcement).await;
        self.broadcast_to_all(PUBLIC_TOPIC, ChatEnvelope::join(&username))
            .await;
        Ok(())
    }

    async fn handle_send_message(
        &self,
        conn_id: ConnId,
        payload: InboundPayload,
    ) -> Result<(), RouterError> {
        let username = self.require_joined(conn_id)?;
        let content = payload.content.unwrap_or_default();
        self.broadcast_to_all(PUBLIC_TOPIC, ChatEnvelope::chat(&username, content))
            .await;
        Ok(())
    }

    async fn handle_exchange_key(
        &self,
        conn_id: ConnId,
        payload: InboundPayload,
    ) -> Result<(), RouterError> {
        let username = self.require_joined(conn_id)?;
        let content = payload
            .content
            .ok_or_else(|| RouterError::Malformed("exchange-key without content".into()))?;
        let (_, peer_hex) = parse_key_exchange(&content).ok_or(RouterError::KeyFormat)?;

        let secret = self.agree(&username, peer_hex).await?;
        info!(conn_id, username = %username, "key agreement completed");
        self.send_to_user(conn_id, KEYS_QUEUE, ChatEnvelope::shared_secret(&secret))
            .await;
        Ok(())
    }

    /// Decode the peer value and combine it with `username`'s private value
    async fn agree(&self, username: &str, peer_hex: &str) -> Result<BigUint, RouterError> {
        let peer = decode_hex(peer_hex).map_err(RouterError::InvalidKey)?;
        validate_public_value(&peer).map_err(|_| RouterError::KeyOutOfRange)?;
        let pair = self
            .keys
            .get_private(username)
            .ok_or_else(|| RouterError::MissingKeyPair(username.to_string()))?;

        tokio::task::spawn_blocking(move || compute_shared_secret(&pair.private, &peer))
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Send one envelope to a single connection. Returns whether it was queued.
    pub async fn send_to_user(
        &self,
        conn_id: ConnId,
        destination: &str,
        envelope: ChatEnvelope,
    ) -> bool {
        let Some(handle) = self.sessions.handle(conn_id) else {
            debug!(conn_id, "unicast target no longer registered");
            return false;
        };
        let Some(frame) = encode(destination, envelope) else {
            return false;
        };
        match handle.deliver(frame).await {
            Ok(()) => true,
            Err(e) => {
                debug!(conn_id, error = %e, "unicast delivery failed");
                false
            }
        }
    }

    /// Send one envelope to every open connection. A failure on one recipient
    /// does not affect the others. Returns the number of recipients reached.
    pub async fn broadcast_to_all(&self, destination: &str, envelope: ChatEnvelope) -> usize {
        let Some(frame) = encode(destination, envelope) else {
            return 0;
        };
        let targets = self.sessions.all_open_handles();
        let results = join_all(targets.into_iter().map(|(conn_id, handle)| {
            let frame = frame.clone();
            async move { (conn_id, handle.deliver(frame).await) }
        }))
        .await;

        let mut delivered = 0;
        for (conn_id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => debug!(conn_id, error = %e, "broadcast delivery failed"),
            }
        }
        delivered
    }
}

fn encode(destination: &str, envelope: ChatEnvelope) -> Option<String> {
    match OutboundFrame::new(destination, envelope).to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "failed to serialize outbound frame");
            None
        }
    }
}
