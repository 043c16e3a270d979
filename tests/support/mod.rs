#![allow(dead_code)]

//! Shared fixtures: an ephemeral mock downstream and a fully wired
//! custodian/broker/proxy stack pointing at it.

use reqwest::Client;
use secrecy::SecretString;
use sensegate::{
    broker::TokenBroker,
    crypto::MasterKey,
    proxy::{ProcessingProxy, ProxyPolicy},
    store::{CredentialRepo, MemoryStore, TokenEntry, TokenRepo, TtlStore},
    vault::CredentialVault,
};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime},
};

/// Serves `router` on an ephemeral local port.
pub async fn spawn_app(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("serve mock downstream");
    });
    addr
}

pub struct Stack {
    pub vault: CredentialVault,
    pub broker: TokenBroker,
    pub proxy: ProcessingProxy,
    pub creds: CredentialRepo,
    pub tokens: TokenRepo,
}

pub struct StackConfig {
    pub auth_url: String,
    pub processing_url: String,
    pub vault_ttl: Duration,
    pub token_ttl: Duration,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://127.0.0.1:9/auth/token".to_string(),
            processing_url: "http://127.0.0.1:9".to_string(),
            vault_ttl: Duration::from_secs(900),
            token_ttl: Duration::from_secs(300),
        }
    }
}

/// Wires a full stack against the given downstream URLs, with
/// millisecond backoffs so retry tests finish quickly.
pub fn build_stack(config: &StackConfig) -> Stack {
    let store: Arc<dyn TtlStore> = MemoryStore::shared();
    let creds = CredentialRepo::new(store.clone());
    let tokens = TokenRepo::new(store.clone());

    // 32 bytes of 0x07, base64-encoded.
    let master_key = SecretString::from("BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=".to_string());
    let vault = CredentialVault::new(
        Arc::new(MasterKey::from_base64(&master_key).expect("test master key")),
        creds.clone(),
        tokens.clone(),
        config.vault_ttl,
    );

    let client = Client::new();
    let broker = TokenBroker::new(
        client.clone(),
        vault.clone(),
        TokenRepo::new(store),
        config.auth_url.clone(),
        config.token_ttl,
    )
    .with_backoff_base(Duration::from_millis(10));

    let proxy = ProcessingProxy::new(client, broker.clone(), config.processing_url.clone())
        .with_policy(ProxyPolicy {
            timeout: Duration::from_secs(5),
            stream_retries: 2,
            backoff_base: Duration::from_millis(10),
        });

    Stack {
        vault,
        broker,
        proxy,
        creds,
        tokens,
    }
}

impl Stack {
    /// Seeds a cached token directly, bypassing the authority.
    pub fn seed_token(&self, principal: &str, token: &str, ttl: Duration) {
        let entry = TokenEntry {
            token: token.to_string(),
            expires_at: SystemTime::now() + ttl,
        };
        self.tokens
            .put(principal, &entry, ttl)
            .expect("seed token entry");
    }
}
