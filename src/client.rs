//! SDK context and chat providers
//!
//! [`ProxyKit`] is built once from a [`Configuration`] and the two platform
//! services (secure store and integrity token provider), then shared by the
//! application. Chat calls go through a [`ChatProvider`], which makes sure a
//! valid session exists before every request.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::Serialize;

use crate::api::{AiProvider, ChatRequest, ChatResponse, ChatStreamChunk};
use crate::attestation::{
    AttestationEngine, AttestationObserver, AttestationStatus, IntegrityTokenProvider, ObserverId,
};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::logging;
use crate::session::SessionCache;
use crate::storage::SecureStore;
use crate::transport::{Dispatch, EventStream, TransportClient};

/// Relay endpoint for proxied chat completions
pub const CHAT_PATH: &str = "/v1/proxy/chat";

/// Configured SDK instance
///
/// Cheap to clone; clones share the session cache, transport and
/// attestation engine.
#[derive(Clone)]
pub struct ProxyKit {
    configuration: Arc<Configuration>,
    sessions: Arc<SessionCache>,
    transport: Arc<TransportClient>,
    attestation: Arc<AttestationEngine>,
}

impl ProxyKit {
    /// Set up the SDK against the configured relay.
    ///
    /// Installs logging for the configured level and, when eager attestation
    /// is enabled and a tokio runtime is running, starts a best-effort
    /// attestation in the background.
    pub fn new(
        configuration: Configuration,
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn IntegrityTokenProvider>,
    ) -> Result<Self> {
        logging::install(configuration.log_level());

        let sessions = Arc::new(SessionCache::new(store));
        let transport = Arc::new(TransportClient::new(&configuration, sessions.clone())?);
        Ok(Self::assemble(configuration, sessions, transport, provider))
    }

    /// Set up the SDK with a custom terminal [`Dispatch`] in place of the
    /// HTTP client.
    pub fn with_dispatcher(
        configuration: Configuration,
        store: Arc<dyn SecureStore>,
        provider: Arc<dyn IntegrityTokenProvider>,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        logging::install(configuration.log_level());

        let sessions = Arc::new(SessionCache::new(store));
        let transport = Arc::new(TransportClient::with_dispatcher(
            &configuration,
            sessions.clone(),
            dispatcher,
        ));
        Self::assemble(configuration, sessions, transport, provider)
    }

    fn assemble(
        configuration: Configuration,
        sessions: Arc<SessionCache>,
        transport: Arc<TransportClient>,
        provider: Arc<dyn IntegrityTokenProvider>,
    ) -> Self {
        let attestation = Arc::new(AttestationEngine::new(
            &configuration,
            transport.clone(),
            sessions.clone(),
            provider,
        ));

        tracing::info!(app_id = %configuration.app_id(), base_url = %configuration.base_url(), "ProxyKit initialized");

        let kit = Self {
            configuration: Arc::new(configuration),
            sessions,
            transport,
            attestation,
        };
        if kit.configuration.eager_attestation() {
            kit.spawn_initial_attestation();
        }
        kit
    }

    fn spawn_initial_attestation(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, initial attestation deferred to first request");
            return;
        };

        let engine = self.attestation.clone();
        runtime.spawn(async move {
            match engine.attest_if_needed().await {
                Ok(()) => tracing::info!("initial attestation completed"),
                // the next request attests again
                Err(e) => tracing::error!(error = %e, "initial attestation failed"),
            }
        });
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// OpenAI through the relay
    pub fn openai(&self) -> ChatProvider {
        self.provider(AiProvider::OpenAi)
    }

    /// Anthropic through the relay
    pub fn anthropic(&self) -> ChatProvider {
        self.provider(AiProvider::Anthropic)
    }

    pub fn provider(&self, provider: AiProvider) -> ChatProvider {
        ChatProvider {
            provider,
            transport: self.transport.clone(),
            attestation: self.attestation.clone(),
            sessions: self.sessions.clone(),
        }
    }

    pub fn attestation(&self) -> &AttestationEngine {
        &self.attestation
    }

    pub fn attestation_status(&self) -> AttestationStatus {
        self.attestation.status()
    }

    pub fn add_attestation_observer(&self, observer: Arc<dyn AttestationObserver>) -> ObserverId {
        self.attestation.add_observer(observer)
    }

    pub fn remove_attestation_observer(&self, id: ObserverId) -> bool {
        self.attestation.remove_observer(id)
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    /// Drop the current session; the next request attests again.
    pub fn clear_session(&self) {
        self.sessions.clear_session();
    }
}

/// Body of `POST /v1/proxy/chat`
#[derive(Serialize)]
struct ProxyChatBody<'a> {
    provider: AiProvider,
    #[serde(flatten)]
    request: &'a ChatRequest,
    stream: bool,
}

/// Chat completions for one upstream provider
#[derive(Clone)]
pub struct ChatProvider {
    provider: AiProvider,
    transport: Arc<TransportClient>,
    attestation: Arc<AttestationEngine>,
    sessions: Arc<SessionCache>,
}

impl ChatProvider {
    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    /// Create a chat completion.
    pub async fn create(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.attestation.attest_if_needed().await?;

        let body = self.body(request, false);
        let result: Result<ChatResponse> = self.transport.post(CHAT_PATH, &body, HeaderMap::new()).await;
        self.expire_on_unauthorized(result)
    }

    /// Create a streaming chat completion.
    ///
    /// Dropping the returned stream closes the connection.
    pub async fn stream(&self, request: &ChatRequest) -> Result<EventStream<ChatStreamChunk>> {
        self.attestation.attest_if_needed().await?;

        let body = self.body(request, true);
        let result: Result<EventStream<ChatStreamChunk>> =
            self.transport.stream(CHAT_PATH, &body, HeaderMap::new()).await;
        self.expire_on_unauthorized(result)
    }

    fn body<'a>(&self, request: &'a ChatRequest, stream: bool) -> ProxyChatBody<'a> {
        ProxyChatBody {
            provider: self.provider,
            request,
            stream,
        }
    }

    fn expire_on_unauthorized<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::SessionExpired) = &result {
            tracing::warn!(provider = %self.provider, "relay rejected the session, clearing it");
            self.sessions.clear_session();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{models, ChatMessage};
    use crate::attestation::{CHALLENGE_PATH, VERIFY_PATH};
    use crate::error::BoxError;
    use crate::storage::MemoryStore;
    use crate::transport::pipeline::tests::{Reply, ScriptedDispatch};
    use async_trait::async_trait;
    use tokio_stream::StreamExt;

    struct StaticToken;

    #[async_trait]
    impl IntegrityTokenProvider for StaticToken {
        async fn request_integrity_token(&self, _nonce: &str) -> std::result::Result<String, BoxError> {
            Ok("tok".into())
        }
    }

    fn config() -> Configuration {
        Configuration::builder()
            .app_id("app_123")
            .base_url("https://relay.test")
            .retry(false, 1)
            .eager_attestation(false)
            .build()
            .unwrap()
    }

    fn kit(replies: Vec<Reply>) -> (ProxyKit, Arc<ScriptedDispatch>) {
        let dispatch = Arc::new(ScriptedDispatch::new(replies));
        let kit = ProxyKit::with_dispatcher(
            config(),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticToken),
            dispatch.clone(),
        );
        (kit, dispatch)
    }

    fn attestation_replies() -> Vec<Reply> {
        vec![
            Reply::Json(200, r#"{"challenge":"n0nce"}"#.into()),
            Reply::Json(200, r#"{"sessionToken":"s1","deviceId":"d1","publicKey":"p1"}"#.into()),
        ]
    }

    fn request() -> ChatRequest {
        ChatRequest::new(models::GPT_4O_MINI, vec![ChatMessage::user("hi")]).max_tokens(16)
    }

    #[tokio::test]
    async fn test_create_attests_then_calls_relay() {
        let mut replies = attestation_replies();
        replies.push(Reply::Json(
            200,
            r#"{"id":"c1","model":"gpt-4o-mini","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}]}"#.into(),
        ));
        let (kit, dispatch) = kit(replies);

        let response = kit.openai().create(&request()).await.unwrap();
        assert_eq!(response.content(), Some("hello"));
        assert_eq!(kit.attestation_status(), AttestationStatus::Success);

        let seen = dispatch.seen.lock();
        assert_eq!(seen[0].path(), CHALLENGE_PATH);
        assert_eq!(seen[1].path(), VERIFY_PATH);
        assert_eq!(seen[2].path(), CHAT_PATH);
        assert_eq!(seen[2].headers["authorization"], "Bearer s1");

        let body: serde_json::Value = serde_json::from_slice(seen[2].body.as_ref().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "provider": "openai",
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 16,
                "stream": false
            })
        );
    }

    #[tokio::test]
    async fn test_existing_session_skips_attestation() {
        let (kit, dispatch) = kit(vec![Reply::Json(200, r#"{"id":"c2"}"#.into())]);
        kit.sessions().save_session("s0", "d0", "p0");

        let response = kit.anthropic().create(&request()).await.unwrap();
        assert_eq!(response.id, "c2");
        assert_eq!(dispatch.calls(), 1);

        let seen = dispatch.seen.lock();
        let body: serde_json::Value = serde_json::from_slice(seen[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["provider"], "anthropic");
    }

    #[tokio::test]
    async fn test_unauthorized_clears_session() {
        let (kit, _dispatch) = kit(vec![Reply::Json(401, r#"{"error":"expired"}"#.into())]);
        kit.sessions().save_session("s0", "d0", "p0");

        let err = kit.openai().create(&request()).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired));
        assert!(!kit.sessions().has_valid_session());
        assert_eq!(kit.sessions().device_id().as_deref(), Some("d0"));
    }

    #[tokio::test]
    async fn test_attestation_failure_stops_request() {
        let (kit, dispatch) = kit(vec![Reply::Json(200, r#"{"challenge":""}"#.into())]);

        let err = kit.openai().create(&request()).await.unwrap_err();
        assert!(matches!(err, Error::AttestationFailed(_)));
        assert_eq!(dispatch.calls(), 1);
        assert!(matches!(kit.attestation_status(), AttestationStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_stream_sends_stream_flag() {
        let (kit, dispatch) = kit(vec![Reply::Json(
            200,
            "data: {\"id\":\"c3\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: [DONE]\n\n".into(),
        )]);
        kit.sessions().save_session("s0", "d0", "p0");

        let chunks: Vec<_> = kit
            .openai()
            .stream(&request())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().delta_content(), Some("Hel"));

        let seen = dispatch.seen.lock();
        let body: serde_json::Value = serde_json::from_slice(seen[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_clear_session_forces_reattestation() {
        let mut replies = attestation_replies();
        replies.push(Reply::Json(200, "{}".into()));
        let (kit, dispatch) = kit(replies);
        kit.sessions().save_session("s0", "d0", "p0");
        kit.clear_session();

        kit.openai().create(&request()).await.unwrap();
        assert_eq!(dispatch.calls(), 3);
        assert_eq!(kit.sessions().session_token().as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_observer_registration() {
        let (kit, _dispatch) = kit(attestation_replies());
        let observer: Arc<dyn AttestationObserver> = Arc::new(|_: &AttestationStatus| {});

        let id = kit.add_attestation_observer(observer.clone());
        assert!(kit.remove_attestation_observer(id));
        assert!(!kit.remove_attestation_observer(id));
    }
}
