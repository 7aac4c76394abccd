//! # ProxyKit Rust Client
//!
//! Call LLM providers from a mobile app through an attesting relay, without
//! shipping provider API keys in the app.
//!
//! ## Device Attestation
//!
//! Before the relay forwards any traffic, the app instance proves it is
//! genuine:
//!
//! - Fetches a fresh challenge nonce from the relay
//! - Asks the platform integrity service for a token bound to that nonce
//! - Submits the token for verification and receives a session
//! - Persists the session (token, device id, public key) in the secure store
//!
//! Sessions are valid for 24 hours and re-established on demand before the
//! next request. Status transitions are published to registered observers.
//!
//! ## Transport
//!
//! Every request runs through a fixed interceptor pipeline: logging, then
//! session header injection, then retry with linear backoff. Streaming
//! completions arrive as Server-Sent Events and are exposed as a
//! [`Stream`](tokio_stream::Stream) that closes the connection when dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use proxykit::{ChatMessage, ChatRequest, Configuration, MemoryStore, ProxyKit};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let configuration = Configuration::builder().app_id("app_123").build()?;
//!     let kit = ProxyKit::new(configuration, Arc::new(MemoryStore::new()), Arc::new(PlayIntegrity))?;
//!
//!     let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello!")]);
//!     let response = kit.openai().create(&request).await?;
//!     println!("{}", response.content().unwrap_or_default());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod attestation;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;
pub mod transport;

pub use api::{AiProvider, ChatMessage, ChatRequest, ChatResponse, ChatStreamChunk, Role};
pub use attestation::{
    AttestationEngine, AttestationObserver, AttestationStatus, IntegrityTokenProvider, ObserverId,
};
pub use client::{ChatProvider, ProxyKit};
pub use config::{Configuration, Environment, RetryPolicy};
pub use error::{BoxError, Error, Result};
pub use logging::LogLevel;
pub use session::{Session, SessionCache};
pub use storage::{MemoryStore, SecureStore};
pub use transport::{EventStream, TransportClient};
