//! Wire envelopes
//!
//! Every frame in either direction is a JSON object `{destination, payload}`.
//! Inbound payloads are loose objects; outbound payloads are [`ChatEnvelope`]s.

use crate::encoding::encode_hex;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Inbound destination: join the chat under `payload.sender`
pub const ADD_USER: &str = "/app/chat.addUser";
/// Inbound destination: broadcast `payload.content`
pub const SEND_MESSAGE: &str = "/app/chat.sendMessage";
/// Inbound destination: agree on a secret with `payload.content`'s public value
pub const EXCHANGE_KEY: &str = "/app/chat.exchangeKey";

/// Outbound per-user channel carrying KEY_EXCHANGE envelopes
pub const KEYS_QUEUE: &str = "/user/queue/keys";
/// Outbound shared channel carrying CHAT, JOIN and LEAVE envelopes
pub const PUBLIC_TOPIC: &str = "/topic/public";

/// Content prefix of a public value announcement
pub const PUBLIC_KEY_PREFIX: &str = "Public Key: ";
/// Content prefix of a computed shared secret
pub const SHARED_SECRET_PREFIX: &str = "Shared Secret: ";
/// Content prefix of an error report
pub const ERROR_PREFIX: &str = "Error: ";

/// Sender name for relay-originated envelopes
pub const SYSTEM_SENDER: &str = "System";

/// Recognised inbound destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// [`ADD_USER`]
    AddUser,
    /// [`SEND_MESSAGE`]
    SendMessage,
    /// [`EXCHANGE_KEY`]
    ExchangeKey,
}

impl Destination {
    /// Exact match against the wire literal
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            ADD_USER => Some(Self::AddUser),
            SEND_MESSAGE => Some(Self::SendMessage),
            EXCHANGE_KEY => Some(Self::ExchangeKey),
            _ => None,
        }
    }

    /// Wire literal for this destination
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddUser => ADD_USER,
            Self::SendMessage => SEND_MESSAGE,
            Self::ExchangeKey => EXCHANGE_KEY,
        }
    }
}

/// Envelope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// User chat text
    Chat,
    /// A user joined
    Join,
    /// A user left
    Leave,
    /// Public key, shared secret or key-exchange error
    KeyExchange,
}

/// Outbound chat-level message.
///
/// `id` is a fresh UUID per envelope and carries no ordering or dedup meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// Random UUID v4
    pub id: String,
    /// Serialized as `type`
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Username, or [`SYSTEM_SENDER`] for relay-originated envelopes
    pub sender: String,
    /// Text, or a prefixed hex value for key exchange
    pub content: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl ChatEnvelope {
    /// Envelope with a fresh id, stamped now
    pub fn new(kind: MessageType, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// CHAT from `sender`
    pub fn chat(sender: &str, content: impl Into<String>) -> Self {
        Self::new(MessageType::Chat, sender, content)
    }

    /// `"<user> joined the chat"`
    pub fn join(username: &str) -> Self {
        Self::new(MessageType::Join, username, format!("{} joined the chat", username))
    }

    /// `"<user> left the chat"`
    pub fn leave(username: &str) -> Self {
        Self::new(MessageType::Leave, username, format!("{} left the chat", username))
    }

    /// `"Public Key: <hex>"` addressed from the key's owner
    pub fn public_key(username: &str, public: &BigUint) -> Self {
        Self::new(
            MessageType::KeyExchange,
            username,
            format!("{}{}", PUBLIC_KEY_PREFIX, encode_hex(public)),
        )
    }

    /// `"Shared Secret: <hex>"` from the relay
    pub fn shared_secret(secret: &BigUint) -> Self {
        Self::new(
            MessageType::KeyExchange,
            SYSTEM_SENDER,
            format!("{}{}", SHARED_SECRET_PREFIX, encode_hex(secret)),
        )
    }

    /// `"Error: <reason>"` from the relay
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::new(
            MessageType::KeyExchange,
            SYSTEM_SENDER,
            format!("{}{}", ERROR_PREFIX, reason),
        )
    }
}

/// Raw inbound frame. Both fields are optional so that shape errors surface
/// as malformed envelopes instead of JSON errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundFrame {
    /// Destination literal, see [`Destination::parse`]
    #[serde(default)]
    pub destination: Option<String>,
    /// Loose payload object, decoded as [`InboundPayload`]
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Fields the relay reads from an inbound payload; anything else is ignored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    /// Username to join as (add-user)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Chat text or `"<label>:<hex>"` key-exchange content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// [`KEYS_QUEUE`] or [`PUBLIC_TOPIC`]
    pub destination: String,
    /// Envelope being delivered
    pub payload: ChatEnvelope,
}

impl OutboundFrame {
    /// Wrap `payload` for `destination`
    pub fn new(destination: &str, payload: ChatEnvelope) -> Self {
        Self {
            destination: destination.to_string(),
            payload,
        }
    }

    /// JSON text of the frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Client-side helper: JSON text of an inbound frame, as a client sends it.
/// The relay itself never builds inbound frames.
pub fn inbound_json(destination: Destination, payload: &InboundPayload) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({
        "destination": destination.as_str(),
        "payload": payload,
    }))
}

/// Split key-exchange content of the form `"<label>:<hex>"`.
///
/// Every `:` splits and trailing empty parts are discarded, so exactly one
/// non-trailing colon is accepted. The value is returned trimmed.
pub fn parse_key_exchange(content: &str) -> Option<(&str, &str)> {
    let mut parts: Vec<&str> = content.split(':').collect();
    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    match parts.as_slice() {
        [label, value] => Some((label, value.trim())),
        _ => None,
    }
}

/// Client-side helper: value of a prefixed content string such as
/// `"Shared Secret: <hex>"`, split at the first `:` and trimmed.
/// The relay itself never reads outbound contents.
pub fn content_value(content: &str) -> Option<&str> {
    content.split_once(':').map(|(_, value)| value.trim())
}
