//! Device attestation
//!
//! Proves to the relay that the calling app instance is genuine and turns the
//! verdict into a session:
//!
//! ## Step 1: Challenge
//! `POST /v1/attestation/challenge` with the app id returns a fresh nonce.
//!
//! ## Step 2: Platform integrity token
//! The nonce is handed to the [`IntegrityTokenProvider`], bounded by the
//! configured timeout.
//!
//! ## Step 3: Verification
//! `POST /v1/attestation/android/verify` exchanges the token for an
//! [`AttestationResult`], which is persisted through the [`SessionCache`].
//!
//! Every transition of [`AttestationStatus`] is delivered to the registered
//! observers. Attempts are single-flight: callers that arrive while an
//! attempt is running wait for it and reuse its session.

pub mod observer;
pub mod provider;
pub mod types;

pub use observer::{AttestationObserver, ObserverId};
pub use provider::{IntegrityTokenProvider, PLATFORM_ANDROID};
pub use types::{AttestationResult, AttestationStatus, Challenge, ChallengeRequest, VerifyRequest};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::HeaderMap;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::session::{token_fingerprint, SessionCache};
use crate::transport::TransportClient;
use observer::ObserverRegistry;

pub const CHALLENGE_PATH: &str = "/v1/attestation/challenge";
pub const VERIFY_PATH: &str = "/v1/attestation/android/verify";

/// Failure reason of an attempt whose caller went away mid-protocol
pub const CANCELLED: &str = "attestation cancelled";

/// Drives the challenge, integrity token, verify, persist protocol
pub struct AttestationEngine {
    app_id: String,
    transport: Arc<TransportClient>,
    sessions: Arc<SessionCache>,
    provider: Arc<dyn IntegrityTokenProvider>,
    timeout: Duration,
    status: RwLock<AttestationStatus>,
    observers: ObserverRegistry,
    /// Held for the whole of one attempt
    attempt: tokio::sync::Mutex<()>,
}

impl AttestationEngine {
    pub fn new(
        configuration: &Configuration,
        transport: Arc<TransportClient>,
        sessions: Arc<SessionCache>,
        provider: Arc<dyn IntegrityTokenProvider>,
    ) -> Self {
        Self {
            app_id: configuration.app_id().to_string(),
            transport,
            sessions,
            provider,
            timeout: configuration.timeout(),
            status: RwLock::new(AttestationStatus::NotStarted),
            observers: ObserverRegistry::default(),
            attempt: tokio::sync::Mutex::new(()),
        }
    }

    /// Current status
    pub fn status(&self) -> AttestationStatus {
        self.status.read().clone()
    }

    /// Attest unless the session cache already holds a valid session.
    ///
    /// Cheap when a session exists; safe to call before every request.
    pub async fn attest_if_needed(&self) -> Result<()> {
        if self.sessions.has_valid_session() {
            return Ok(());
        }

        let _attempt = self.attempt.lock().await;
        if self.sessions.has_valid_session() {
            tracing::debug!("session established by a concurrent attempt");
            return Ok(());
        }
        self.run().await
    }

    /// Attest regardless of the cached session.
    pub async fn force_attestation(&self) -> Result<()> {
        let _attempt = self.attempt.lock().await;
        self.run().await
    }

    /// Subscribe to status transitions.
    ///
    /// Only a weak reference is kept; the caller owns `observer` and should
    /// call [`remove_observer`](Self::remove_observer) before dropping it.
    pub fn add_observer(&self, observer: Arc<dyn AttestationObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Number of registered observers, including ones not yet pruned
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    async fn run(&self) -> Result<()> {
        self.transition(AttestationStatus::InProgress);
        let attempt = Attempt::start(self);

        let outcome = self.attest().await;
        attempt.finish();

        match outcome {
            Ok(()) => {
                self.transition(AttestationStatus::Success);
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "attestation failed");
                self.transition(AttestationStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn attest(&self) -> Result<()> {
        let challenge: Challenge = self
            .transport
            .post(
                CHALLENGE_PATH,
                &ChallengeRequest { app_id: &self.app_id },
                HeaderMap::new(),
            )
            .await?;

        if challenge.nonce.is_empty() {
            return Err(Error::AttestationFailed("relay returned an empty challenge".into()));
        }
        tracing::debug!("challenge received");

        let token = self.integrity_token(&challenge.nonce).await?;

        let result: AttestationResult = self
            .transport
            .post(
                VERIFY_PATH,
                &VerifyRequest {
                    app_id: &self.app_id,
                    attestation: &token,
                    platform: self.provider.platform(),
                },
                HeaderMap::new(),
            )
            .await?;

        if result.session_token.is_empty() {
            return Err(Error::AttestationFailed("relay returned no session token".into()));
        }

        self.sessions
            .save_session(&result.session_token, &result.device_id, &result.public_key);
        tracing::info!(
            session = %token_fingerprint(&result.session_token),
            device_id = %result.device_id,
            expires_at = %result.expires_at,
            "attestation succeeded"
        );
        Ok(())
    }

    async fn integrity_token(&self, nonce: &str) -> Result<String> {
        let request = self.provider.request_integrity_token(nonce);
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(token)) if token.is_empty() => Err(Error::AttestationFailed(
                "integrity provider returned an empty token".into(),
            )),
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) => Err(Error::AttestationFailed(format!("integrity provider failed: {e}"))),
            Err(_) => Err(Error::AttestationFailed(format!(
                "integrity provider timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn transition(&self, status: AttestationStatus) {
        tracing::debug!(%status, "attestation status changed");
        *self.status.write() = status.clone();
        self.observers.notify(&status);
    }
}

/// An attempt in flight. Dropped unfinished, it marks the attempt failed so
/// the status never stays `InProgress` after the caller went away.
struct Attempt<'a> {
    engine: Option<&'a AttestationEngine>,
}

impl<'a> Attempt<'a> {
    fn start(engine: &'a AttestationEngine) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    fn finish(mut self) {
        self.engine = None;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            tracing::warn!("attestation cancelled before completion");
            engine.transition(AttestationStatus::Failed(CANCELLED.to_string()));
        }
    }
}
