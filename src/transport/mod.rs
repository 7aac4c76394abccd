//! HTTP transport to the relay
//!
//! Every call goes through a fixed pipeline:
//!
//! 1. [`LoggingInterceptor`] - method, URL, headers (never `Authorization`), status, latency
//! 2. [`AuthInterceptor`] - bearer token and device id, skipped for attestation endpoints
//! 3. [`RetryInterceptor`] - linear backoff for transient failures, only when enabled
//!
//! Non-2xx responses are mapped onto the SDK error taxonomy: 401 is
//! [`Error::SessionExpired`], 429 is [`Error::RateLimited`], any other 4xx is
//! [`Error::Provider`], everything else is [`Error::Network`].

pub mod interceptors;
pub mod pipeline;
pub mod sse;

pub use interceptors::{AuthInterceptor, LoggingInterceptor, RetryInterceptor};
pub use pipeline::{Dispatch, Interceptor, Next, RelayRequest, ReqwestDispatcher};
pub use sse::{EventStream, SseCodec, SseEvent};

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::session::SessionCache;

/// `Retry-After` used when a 429 carries no parseable value
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

const EVENT_STREAM: &str = "text/event-stream";

/// Relay client with the SDK interceptor pipeline
pub struct TransportClient {
    base_url: String,
    interceptors: Vec<Arc<dyn Interceptor>>,
    dispatcher: Arc<dyn Dispatch>,
}

impl TransportClient {
    /// Create a client that talks to the configured relay over `reqwest`.
    pub fn new(configuration: &Configuration, sessions: Arc<SessionCache>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(configuration.timeout())
            .read_timeout(configuration.timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_dispatcher(
            configuration,
            sessions,
            Arc::new(ReqwestDispatcher::new(client)),
        ))
    }

    /// Create a client whose requests end at `dispatcher`.
    pub fn with_dispatcher(
        configuration: &Configuration,
        sessions: Arc<SessionCache>,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        let mut interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(LoggingInterceptor),
            Arc::new(AuthInterceptor::new(sessions)),
        ];

        let retry = configuration.retry();
        if retry.enabled {
            interceptors.push(Arc::new(RetryInterceptor::new(retry.max_attempts)));
        }

        Self {
            base_url: configuration.base_url().as_str().trim_end_matches('/').to_string(),
            interceptors,
            dispatcher,
        }
    }

    /// `GET {base}{path}` and decode the JSON response.
    pub async fn get<T>(&self, path: &str, headers: HeaderMap) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let request = self.request(Method::GET, path, headers, None)?;
        self.execute(request).await
    }

    /// `POST {base}{path}` with a JSON body and decode the JSON response.
    pub async fn post<B, T>(&self, path: &str, body: &B, headers: HeaderMap) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path, headers, Some(encode(body)?))?;
        self.execute(request).await
    }

    /// `POST {base}{path}` and read the response as a Server-Sent Event stream.
    ///
    /// Resolves once the relay accepted the request; events arrive through
    /// the returned [`EventStream`].
    pub async fn stream<B, T>(&self, path: &str, body: &B, headers: HeaderMap) -> Result<EventStream<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let mut request = self.request(Method::POST, path, headers, Some(encode(body)?))?;
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM));

        let response = error_for_status(self.send(request).await?).await?;
        Ok(EventStream::spawn(response))
    }

    fn request(&self, method: Method, path: &str, headers: HeaderMap, body: Option<Bytes>) -> Result<RelayRequest> {
        let url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| Error::Configuration(format!("Invalid request path {path:?}: {e}")))?;

        let mut request = RelayRequest::new(method, url);
        request.headers = headers;
        if body.is_some() {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        request.body = body;
        Ok(request)
    }

    async fn send(&self, request: RelayRequest) -> Result<Response> {
        Next::new(&self.interceptors, self.dispatcher.as_ref())
            .run(request)
            .await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RelayRequest) -> Result<T> {
        let response = error_for_status(self.send(request).await?).await?;
        let body = response.bytes().await.map_err(Error::network)?;
        decode(&body)
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(Error::RequestEncoding)
}

/// Decode a 2xx body. Unknown fields are ignored; an empty body reads as `null`
/// so unit-like responses decode.
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Pass 2xx responses through; map everything else onto the error taxonomy.
pub(crate) async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let err = match status.as_u16() {
        401 => Error::SessionExpired,
        429 => Error::RateLimited {
            retry_after_seconds: retry_after(response.headers()),
        },
        code @ 400..=499 => Error::Provider {
            code,
            message: response.text().await.unwrap_or_default(),
        },
        code => Error::network(format!(
            "HTTP {}: {}",
            code,
            status.canonical_reason().unwrap_or("Unknown error")
        )),
    };

    tracing::debug!(status = status.as_u16(), error = %err, "relay returned an error");
    Err(err)
}

fn retry_after(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS)
}
