use async_trait::async_trait;

use crate::error::BoxError;

/// Platform name sent with Android integrity verdicts
pub const PLATFORM_ANDROID: &str = "ANDROID";

/// Platform service that turns a relay nonce into a signed integrity token
/// (Play Integrity on Android).
///
/// Implementations live with the host application; the SDK only depends on
/// this contract. The call is bounded by the configured timeout.
#[async_trait]
pub trait IntegrityTokenProvider: Send + Sync {
    /// Request an integrity token bound to `nonce`.
    async fn request_integrity_token(&self, nonce: &str) -> Result<String, BoxError>;

    /// Platform identifier reported to the relay.
    fn platform(&self) -> &str {
        PLATFORM_ANDROID
    }
}
