//! Core types for the attestation exchange

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

/// Progress of the attestation state machine.
///
/// `Success` and `Failed` hold until the next attempt moves the machine back
/// to `InProgress`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttestationStatus {
    #[default]
    NotStarted,
    InProgress,
    Success,
    Failed(String),
}

impl AttestationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttestationStatus::Success | AttestationStatus::Failed(_))
    }
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationStatus::NotStarted => f.write_str("not started"),
            AttestationStatus::InProgress => f.write_str("in progress"),
            AttestationStatus::Success => f.write_str("success"),
            AttestationStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Body of `POST /v1/attestation/challenge`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest<'a> {
    pub app_id: &'a str,
}

/// Server-issued nonce, fetched fresh for every attempt and never persisted
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Challenge {
    #[serde(rename = "challenge", default)]
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub nonce: String,
}

/// Body of `POST /v1/attestation/android/verify`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest<'a> {
    pub app_id: &'a str,
    pub attestation: &'a str,
    pub platform: &'a str,
}

/// Verified server response that seeds a new session
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttestationResult {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub session_token: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub device_id: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub public_key: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub expires_at: String,
}
