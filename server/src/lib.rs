//! dhchat relay server
//!
//! Group chat over WebSockets where the relay generates a Diffie-Hellman key
//! pair for every joining user and computes shared secrets on request. The
//! relay holds every private value, so it can derive any shared secret itself,
//! and it does not authenticate public values. This is a teaching relay, not
//! an end-to-end encrypted one.

pub mod config;
pub mod keystore;
pub mod router;
pub mod routing;
pub mod session;
pub mod websocket;

pub use config::ServerConfig;
pub use keystore::UserKeyStore;
pub use router::{ChatRouter, RouterError};
pub use session::{ClientHandle, ConnId, DeliveryError, SessionRegistry};
pub use websocket::ServerState;
