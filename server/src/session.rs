//! Live connection registry

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

/// Connection identifier, unique for the life of the process
pub type ConnId = u64;

/// Why a frame could not be queued for one recipient
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    TimedOut,
}

/// Outbound side of a connection: the sender half of its forwarding queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<String>,
    send_timeout: Duration,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<String>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }

    /// True once the forwarding task has dropped its receiver
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue one text frame, waiting at most `send_timeout` for queue space
    pub async fn deliver(&self, frame: String) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut),
        }
    }
}

struct Session {
    handle: ClientHandle,
    username: Option<String>,
}

/// Process-wide `ConnId -> (handle, username)` registry.
///
/// Handle and username live in one entry so that `unregister` removes both at once.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnId, Session>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection id
    pub fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Track a connection. Any stale entry under the same id is replaced.
    pub fn register(&self, conn_id: ConnId, handle: ClientHandle) {
        self.sessions.insert(
            conn_id,
            Session {
                handle,
                username: None,
            },
        );
    }

    /// Bind `username` to a registered connection, overwriting any earlier binding.
    /// Returns false if the connection is not registered.
    pub fn bind_user(&self, conn_id: ConnId, username: &str) -> bool {
        match self.sessions.get_mut(&conn_id) {
            Some(mut session) => {
                session.username = Some(username.to_string());
                true
            }
            None => false,
        }
    }

    pub fn lookup_username(&self, conn_id: ConnId) -> Option<String> {
        self.sessions.get(&conn_id).and_then(|s| s.username.clone())
    }

    pub fn handle(&self, conn_id: ConnId) -> Option<ClientHandle> {
        self.sessions.get(&conn_id).map(|s| s.handle.clone())
    }

    /// Remove a connection, returning its handle and bound username
    pub fn unregister(&self, conn_id: ConnId) -> Option<(ClientHandle, Option<String>)> {
        self.sessions
            .remove(&conn_id)
            .map(|(_, session)| (session.handle, session.username))
    }

    /// Snapshot of every handle that is still open, in no particular order.
    /// Closed handles are skipped but stay registered until `unregister`.
    pub fn all_open_handles(&self) -> Vec<(ConnId, ClientHandle)> {
        self.sessions
            .iter()
            .filter(|entry| !entry.handle.is_closed())
            .map(|entry| (*entry.key(), entry.handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of connections with a bound username
    pub fn joined_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.username.is_some()).count()
    }
}
