//! Session lifecycle on top of the secure store
//!
//! A session is valid for 24 hours from the moment it was saved. Expired
//! sessions are purged the first time they are read; there is no background
//! sweep.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::storage::{
    SecureStore, KEY_DEVICE_ID, KEY_PUBLIC_KEY, KEY_SESSION_TIMESTAMP, KEY_SESSION_TOKEN,
};

/// Lifetime of a session after it is saved
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Credential bundle obtained from a successful attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub device_id: String,
    pub public_key: String,
    pub issued_at_millis: i64,
}

/// Validity rules over the persisted session
pub struct SessionCache {
    store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    /// Serializes check-then-purge against saves
    guard: Mutex<()>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn SecureStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            guard: Mutex::new(()),
        }
    }

    /// Whether a stored session exists and is younger than [`SESSION_TTL`].
    ///
    /// An expired session is purged as a side effect.
    pub fn has_valid_session(&self) -> bool {
        self.valid_token().is_some()
    }

    /// The session token, if the stored session is still valid
    pub fn session_token(&self) -> Option<String> {
        self.valid_token()
    }

    /// Last persisted device id; survives session expiry
    pub fn device_id(&self) -> Option<String> {
        self.store.get(KEY_DEVICE_ID)
    }

    /// Last persisted relay public key; survives session expiry
    pub fn public_key(&self) -> Option<String> {
        self.store.get(KEY_PUBLIC_KEY)
    }

    /// The full session, if valid
    pub fn current(&self) -> Option<Session> {
        let _guard = self.guard.lock();
        let mut values = self
            .store
            .get_many(&[
                KEY_SESSION_TOKEN,
                KEY_SESSION_TIMESTAMP,
                KEY_DEVICE_ID,
                KEY_PUBLIC_KEY,
            ])
            .into_iter();

        let token = values.next().flatten();
        let timestamp = values.next().flatten();
        let (token, issued_at_millis) = self.check(token, timestamp)?;

        Some(Session {
            token,
            issued_at_millis,
            device_id: values.next().flatten().unwrap_or_default(),
            public_key: values.next().flatten().unwrap_or_default(),
        })
    }

    /// Replace the stored session and restart its lifetime.
    pub fn save_session(&self, token: &str, device_id: &str, public_key: &str) {
        let _guard = self.guard.lock();
        let issued_at = self.clock.now_millis().to_string();

        self.store.put_many(&[
            (KEY_SESSION_TOKEN, token),
            (KEY_SESSION_TIMESTAMP, &issued_at),
            (KEY_DEVICE_ID, device_id),
            (KEY_PUBLIC_KEY, public_key),
        ]);

        tracing::debug!(
            token_fp = %token_fingerprint(token),
            device_id,
            "session saved"
        );
    }

    /// Drop the session token, keeping device identity.
    pub fn clear_session(&self) {
        let _guard = self.guard.lock();
        self.purge();
        tracing::debug!("session cleared");
    }

    /// Drop everything, including device identity.
    pub fn clear_all(&self) {
        let _guard = self.guard.lock();
        self.store.clear();
        tracing::debug!("all credentials cleared");
    }

    fn valid_token(&self) -> Option<String> {
        let _guard = self.guard.lock();
        let mut values = self
            .store
            .get_many(&[KEY_SESSION_TOKEN, KEY_SESSION_TIMESTAMP])
            .into_iter();

        let token = values.next().flatten();
        let timestamp = values.next().flatten();
        self.check(token, timestamp).map(|(token, _)| token)
    }

    /// Caller holds `guard`.
    fn check(&self, token: Option<String>, timestamp: Option<String>) -> Option<(String, i64)> {
        let Some(token) = token else {
            tracing::debug!("no session token stored");
            return None;
        };

        // A token without a readable timestamp cannot be aged; treat it as expired.
        let issued_at = timestamp.and_then(|t| t.parse::<i64>().ok()).unwrap_or(0);
        let age = self.clock.now_millis().saturating_sub(issued_at);

        if age >= SESSION_TTL.as_millis() as i64 {
            tracing::debug!(age_ms = age, "session expired");
            self.purge();
            return None;
        }

        tracing::debug!(age_ms = age, token_fp = %token_fingerprint(&token), "valid session found");
        Some((token, issued_at))
    }

    fn purge(&self) {
        self.store
            .remove_many(&[KEY_SESSION_TOKEN, KEY_SESSION_TIMESTAMP]);
    }
}

/// Short, non-reversible identifier of a token for diagnostics.
pub(crate) fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}
