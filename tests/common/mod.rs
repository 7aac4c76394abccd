//! Fake relay for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use proxykit::{BoxError, Configuration, Environment, IntegrityTokenProvider};
use serde_json::{json, Value};

/// One request as the relay saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: &'static str,
    pub authorization: Option<String>,
    pub device_id: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

/// Scripted chat reply
#[derive(Debug, Clone)]
pub enum ChatReply {
    Json(Value),
    Events(String),
    Status(u16, String),
}

#[derive(Default)]
pub struct Relay {
    pub requests: Mutex<Vec<Recorded>>,
    pub chat: Mutex<VecDeque<ChatReply>>,
}

impl Relay {
    pub fn script(&self, replies: impl IntoIterator<Item = ChatReply>) {
        self.chat.lock().extend(replies);
    }

    pub fn paths(&self) -> Vec<&'static str> {
        self.requests.lock().iter().map(|r| r.path).collect()
    }

    pub fn recorded(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn record(&self, path: &'static str, headers: &HeaderMap, body: Value) {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.requests.lock().push(Recorded {
            path,
            authorization: text("authorization"),
            device_id: text("x-device-id"),
            accept: text("accept"),
            body,
        });
    }
}

pub const CHALLENGE: &str = "/v1/attestation/challenge";
pub const VERIFY: &str = "/v1/attestation/android/verify";
pub const CHAT: &str = "/v1/proxy/chat";

async fn challenge(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    relay.record(CHALLENGE, &headers, body);
    Json(json!({ "challenge": "n0nce" }))
}

async fn verify(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let accepted = body["attestation"] == "tok";
    relay.record(VERIFY, &headers, body);
    if !accepted {
        return (StatusCode::FORBIDDEN, "integrity verdict rejected").into_response();
    }

    Json(json!({
        "sessionToken": "s1",
        "deviceId": "d1",
        "publicKey": "p1",
        "expiresAt": "2030-01-01T00:00:00Z"
    }))
    .into_response()
}

async fn chat(State(relay): State<Arc<Relay>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    relay.record(CHAT, &headers, body);

    let reply = relay.chat.lock().pop_front();
    match reply {
        Some(ChatReply::Json(value)) => Json(value).into_response(),
        Some(ChatReply::Events(events)) => {
            ([(header::CONTENT_TYPE, "text/event-stream")], events).into_response()
        }
        Some(ChatReply::Status(code, message)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, message).into_response()
        }
        None => Json(json!({ "id": "default" })).into_response(),
    }
}

/// Start a relay on an ephemeral port.
pub async fn spawn_relay() -> (Arc<Relay>, SocketAddr) {
    let relay = Arc::new(Relay::default());
    let app = Router::new()
        .route(CHALLENGE, post(challenge))
        .route(VERIFY, post(verify))
        .route(CHAT, post(chat))
        .with_state(relay.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (relay, addr)
}

/// Configuration pointing at a local relay
pub fn configuration(addr: SocketAddr) -> Configuration {
    Configuration::builder()
        .app_id("app_123")
        .base_url(format!("http://{addr}"))
        .environment(Environment::Development)
        .eager_attestation(false)
        .build()
        .unwrap()
}

/// Integrity provider that answers every nonce with `tok`
#[derive(Default)]
pub struct FakeIntegrity {
    pub nonces: Mutex<Vec<String>>,
}

#[async_trait]
impl IntegrityTokenProvider for FakeIntegrity {
    async fn request_integrity_token(&self, nonce: &str) -> Result<String, BoxError> {
        self.nonces.lock().push(nonce.to_string());
        Ok("tok".to_string())
    }
}
