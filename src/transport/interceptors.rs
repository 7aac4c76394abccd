//! Built-in interceptors: logging, auth-header injection, retry with backoff

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Response;

use super::pipeline::{Interceptor, Next, RelayRequest};
use crate::error::{Error, Result};
use crate::session::SessionCache;

/// Header carrying the attested device identity
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Requests whose path contains this marker are part of the attestation
/// handshake and must go out without credentials.
pub const ATTESTATION_PATH_MARKER: &str = "/attestation/";

/// Step of the linear backoff between retry attempts
pub const BACKOFF_STEP: Duration = Duration::from_millis(1000);

/// Records requests and responses. Never alters either.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, request: RelayRequest, next: Next<'_>) -> Result<Response> {
        let method = request.method.clone();
        let url = request.url.clone();

        tracing::debug!(%method, %url, "→ request");
        for (name, value) in request.headers.iter() {
            if name == AUTHORIZATION {
                continue;
            }
            tracing::debug!(
                header = %name,
                value = value.to_str().unwrap_or("<binary>"),
                "  header"
            );
        }

        let started = Instant::now();
        let outcome = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), %url, elapsed_ms, "← response");
            }
            Err(e) => {
                tracing::debug!(%method, %url, elapsed_ms, error = %e, "← request failed");
            }
        }

        outcome
    }
}

/// Attaches the session bearer token and device id to relay calls.
///
/// Missing credentials are not an error here: the relay answers 401 and the
/// transport surfaces [`Error::SessionExpired`].
pub struct AuthInterceptor {
    sessions: Arc<SessionCache>,
}

impl AuthInterceptor {
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(&self, mut request: RelayRequest, next: Next<'_>) -> Result<Response> {
        if request.path().contains(ATTESTATION_PATH_MARKER) {
            return next.run(request).await;
        }

        if let Some(token) = self.sessions.session_token() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("stored session token is not a valid header value"),
            }
        }

        if let Some(device_id) = self.sessions.device_id().filter(|id| !id.is_empty()) {
            match HeaderValue::from_str(&device_id) {
                Ok(value) => {
                    request
                        .headers
                        .insert(HeaderName::from_static(DEVICE_ID_HEADER), value);
                }
                Err(_) => tracing::warn!("stored device id is not a valid header value"),
            }
        }

        next.run(request).await
    }
}

/// Resends requests that failed transiently.
///
/// 2xx and 4xx responses return at once. Other statuses and transport failures
/// are retried up to `max_attempts` in total, waiting `(attempt + 1) * 1s`
/// between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryInterceptor {
    max_attempts: u32,
}

impl RetryInterceptor {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Wait after the zero-based `attempt` failed
    pub fn backoff(attempt: u32) -> Duration {
        BACKOFF_STEP * (attempt + 1)
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    async fn intercept(&self, request: RelayRequest, next: Next<'_>) -> Result<Response> {
        let mut last_failure: Option<Error> = None;

        for attempt in 0..self.max_attempts {
            match next.run(request.clone()).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status.is_client_error() {
                        return Ok(response);
                    }
                    tracing::debug!(
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        "request failed"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        error = %e,
                        "request failed"
                    );
                    last_failure = Some(e);
                }
            }

            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(Self::backoff(attempt)).await;
            }
        }

        tracing::warn!(attempts = self.max_attempts, path = request.path(), "retries exhausted");
        Err(last_failure.unwrap_or_else(|| {
            Error::network(format!("request failed after {} attempts", self.max_attempts))
        }))
    }
}
