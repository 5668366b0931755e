//! Per-user key pair storage

use dashmap::DashMap;
use dhchat_shared::KeyPair;

/// Process-wide `username -> KeyPair` map.
///
/// Exactly one live key pair per username; a new pair silently replaces the old one.
#[derive(Debug, Default)]
pub struct UserKeyStore {
    pairs: DashMap<String, KeyPair>,
}

impl UserKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the pair for `username`
    pub fn put(&self, username: &str, pair: KeyPair) {
        self.pairs.insert(username.to_string(), pair);
    }

    /// Current pair for `username`, if one was generated and not yet evicted
    pub fn get_private(&self, username: &str) -> Option<KeyPair> {
        self.pairs.get(username).map(|entry| entry.value().clone())
    }

    /// Evict the pair for `username`. Absent usernames are a no-op.
    pub fn remove(&self, username: &str) {
        self.pairs.remove(username);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
