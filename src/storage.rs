//! Secure credential storage contract
//!
//! The platform keystore (encrypted preferences, keychain, ...) lives outside
//! the SDK. It is consumed through [`SecureStore`]; the grouped operations must
//! be atomic with respect to readers so a session tuple is never observed
//! half-written.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Stored session token
pub const KEY_SESSION_TOKEN: &str = "session_token";
/// Epoch millis at which the stored session was issued
pub const KEY_SESSION_TIMESTAMP: &str = "session_timestamp";
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_PUBLIC_KEY: &str = "public_key";

/// Durable key/value store for credentials.
///
/// Writes are last-writer-wins. Implementations backed by a transactional
/// store should override the `*_many` methods so each call commits as one unit.
pub trait SecureStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    /// Remove every entry
    fn clear(&self);

    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn put_many(&self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    fn remove_many(&self, keys: &[&str]) {
        for key in keys {
            self.remove(key);
        }
    }
}

/// In-process store with atomic grouped operations.
///
/// Nothing survives the process; useful for tests and for hosts that manage
/// persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn get_many(&self, keys: &[&str]) -> Vec<Option<String>> {
        let entries = self.entries.read();
        keys.iter().map(|key| entries.get(*key).cloned()).collect()
    }

    fn put_many(&self, items: &[(&str, &str)]) {
        let mut entries = self.entries.write();
        for (key, value) in items {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove_many(&self, keys: &[&str]) {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(*key);
        }
    }
}
