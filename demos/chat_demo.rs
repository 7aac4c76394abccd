//! Attest against a relay and run one unary and one streaming completion
//!
//! ```text
//! PROXYKIT_APP_ID=app_... PROXYKIT_INTEGRITY_TOKEN=... cargo run --example chat_demo
//! ```
//!
//! `PROXYKIT_BASE_URL` points the demo at another relay (http is accepted for
//! local relays). Outside Android there is no Play Integrity service, so the
//! integrity token is taken from the environment.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use proxykit::api::models;
use proxykit::{
    AttestationStatus, BoxError, ChatMessage, ChatRequest, Configuration, Environment,
    IntegrityTokenProvider, LogLevel, MemoryStore, ProxyKit,
};
use tokio_stream::StreamExt;

/// Integrity provider that hands out a pre-issued token
struct EnvIntegrity(String);

#[async_trait]
impl IntegrityTokenProvider for EnvIntegrity {
    async fn request_integrity_token(&self, _nonce: &str) -> Result<String, BoxError> {
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app_id = std::env::var("PROXYKIT_APP_ID")?;
    let token = std::env::var("PROXYKIT_INTEGRITY_TOKEN")?;

    let mut builder = Configuration::builder()
        .app_id(app_id)
        .log_level(LogLevel::Info)
        .eager_attestation(false);
    if let Ok(base_url) = std::env::var("PROXYKIT_BASE_URL") {
        builder = builder.base_url(base_url).environment(Environment::Development);
    }

    let kit = ProxyKit::new(builder.build()?, Arc::new(MemoryStore::new()), Arc::new(EnvIntegrity(token)))?;
    let _observer = {
        let observer: Arc<dyn proxykit::AttestationObserver> =
            Arc::new(|status: &AttestationStatus| println!("   → attestation {status}"));
        kit.add_attestation_observer(observer.clone());
        observer
    };

    println!("Step 1: Device attestation...");
    kit.attestation().attest_if_needed().await?;
    println!("   ✓ Session established (device {})", kit.sessions().device_id().unwrap_or_default());

    println!("\nStep 2: Chat completion...");
    let request = ChatRequest::new(
        models::GPT_4O_MINI,
        vec![
            ChatMessage::system("You are a terse assistant."),
            ChatMessage::user("Say hello in five words."),
        ],
    )
    .max_tokens(32);
    let response = kit.openai().create(&request).await?;
    println!("   ✓ {}", response.content().unwrap_or_default());
    if let Some(usage) = response.usage {
        println!("   ✓ {} tokens", usage.total_tokens);
    }

    println!("\nStep 3: Streaming completion...");
    let mut stream = kit.openai().stream(&request).await?;
    print!("   ");
    while let Some(chunk) = stream.next().await {
        if let Some(text) = chunk?.delta_content() {
            print!("{text}");
            std::io::stdout().flush()?;
        }
    }
    println!("\n   ✓ Stream complete");

    Ok(())
}
