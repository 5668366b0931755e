//! dhchat protocol primitives
//!
//! Finite-field Diffie-Hellman over the RFC 3526 2048-bit group, the hex codec
//! used for group elements on the wire, and the JSON envelopes exchanged
//! between clients and the relay.
//!
//! This is not an end-to-end encryption scheme: the relay generates and holds
//! every private value and no public value is authenticated.

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod dh;
pub mod encoding;
pub mod envelope;
pub mod error;

pub use dh::{
    compute_shared_secret, generate_keypair, generate_keypair_with, validate_public_value,
    GroupParams, KeyPair,
};
pub use encoding::{decode_hex, encode_hex};
pub use envelope::{
    content_value, parse_key_exchange, ChatEnvelope, Destination, InboundFrame, InboundPayload,
    MessageType, OutboundFrame,
};
pub use error::KeyAgreementError;

/// Version of the wire protocol
pub const PROTOCOL_VERSION: u8 = 1;
