//! Error types for the ProxyKit client

use thiserror::Error;

/// Boxed cause carried by network and platform-provider failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ProxyKit is not configured")]
    NotConfigured,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device attestation failed: {0}")]
    AttestationFailed(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Network error: {0}")]
    Network(#[source] BoxError),

    #[error("Provider error ({code}): {message}")]
    Provider { code: u16, message: String },

    #[error("Stream was interrupted")]
    StreamInterrupted,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    RequestEncoding(#[source] serde_json::Error),
}

impl Error {
    /// Wrap any transport-level failure as [`Error::Network`].
    pub fn network(cause: impl Into<BoxError>) -> Self {
        Error::Network(cause.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
