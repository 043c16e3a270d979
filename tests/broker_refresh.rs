//! Token brokerage against a mock authority: credentials grant,
//! bounded retry, stale-token preference and the refresh cycle.

mod support;

use axum::{
    Router,
    extract::{Extension, Form},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::SecretString;
use sensegate::Error;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use support::{StackConfig, build_stack, spawn_app};

#[derive(Clone)]
struct MockAuth {
    hits: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl MockAuth {
    fn new(failures: usize) -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn token_endpoint(
    mock: Extension<MockAuth>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let hit = mock.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if hit <= mock.failures.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "authority unavailable").into_response();
    }

    if form.get("grant_type").map(String::as_str) != Some("password") {
        return (StatusCode::BAD_REQUEST, "unsupported grant").into_response();
    }
    let username = form.get("username").cloned().unwrap_or_default();
    if form.get("password").map_or(true, String::is_empty) {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }

    format!("tok-{username}-{hit}").into_response()
}

async fn auth_stack(failures: usize, config: StackConfig) -> (support::Stack, MockAuth) {
    let mock = MockAuth::new(failures);
    let router = Router::new()
        .route("/auth/token", post(token_endpoint))
        .layer(Extension(mock.clone()));
    let addr = spawn_app(router).await;

    let stack = build_stack(&StackConfig {
        auth_url: format!("http://{addr}/auth/token"),
        ..config
    });
    (stack, mock)
}

#[tokio::test]
async fn test_login_flow_stores_token() {
    let (stack, mock) = auth_stack(0, StackConfig::default()).await;
    let password = SecretString::from("pw1".to_string());

    stack.vault.store("alice@example.com", &password).unwrap();
    stack
        .broker
        .fetch_and_store("alice@example.com", &password)
        .await
        .unwrap();

    let token = stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .expect("token should be cached");
    assert!(token.starts_with("tok-alice@example.com"));
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_backoff_retries_then_success() {
    let (stack, mock) = auth_stack(2, StackConfig::default()).await;
    let password = SecretString::from("pw1".to_string());

    stack
        .broker
        .fetch_and_store("alice@example.com", &password)
        .await
        .unwrap();

    // Two 503s, success on the third attempt.
    assert_eq!(mock.hits(), 3);
    assert!(stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_retry_budget_exhausted_keeps_previous_token() {
    let (stack, mock) = auth_stack(0, StackConfig::default()).await;
    let password = SecretString::from("pw1".to_string());

    stack
        .broker
        .fetch_and_store("alice@example.com", &password)
        .await
        .unwrap();
    let first = stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .expect("first token");

    // Authority goes down for good: exactly three more attempts, then
    // the stale token remains preferred over none.
    mock.failures.store(usize::MAX, Ordering::SeqCst);
    let result = stack
        .broker
        .fetch_and_store("alice@example.com", &password)
        .await;
    assert!(matches!(
        result,
        Err(Error::UpstreamServer {
            status: Some(503),
            ..
        })
    ));
    assert_eq!(mock.hits(), 4);
    assert_eq!(
        stack.broker.current_token("alice@example.com").unwrap(),
        Some(first)
    );
}

#[tokio::test]
async fn test_token_expires_and_refresh_cycle_restores_it() {
    let (stack, _mock) = auth_stack(
        0,
        StackConfig {
            token_ttl: Duration::from_millis(300),
            vault_ttl: Duration::from_secs(5),
            ..StackConfig::default()
        },
    )
    .await;
    let password = SecretString::from("pw1".to_string());

    stack.vault.store("alice@example.com", &password).unwrap();
    stack
        .broker
        .fetch_and_store("alice@example.com", &password)
        .await
        .unwrap();
    assert!(stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .is_some());

    // Past the token TTL without a refresh cycle: not available.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .is_none());

    // One refresh cycle re-reads the vault and restores the token.
    assert_eq!(stack.broker.refresh_cycle().await.unwrap(), 1);
    assert!(stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_refresh_silently_skips_expired_vault_entry() {
    let (stack, mock) = auth_stack(
        0,
        StackConfig {
            vault_ttl: Duration::from_millis(100),
            token_ttl: Duration::from_millis(50),
            ..StackConfig::default()
        },
    )
    .await;
    let password = SecretString::from("pw1".to_string());

    stack.vault.store("alice@example.com", &password).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(stack.broker.refresh_cycle().await.unwrap(), 0);
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn test_refresh_cycle_isolates_principal_failures() {
    let (stack, mock) = auth_stack(0, StackConfig::default()).await;
    let password = SecretString::from("pw1".to_string());

    stack.vault.store("alice@example.com", &password).unwrap();
    stack.vault.store("bob@example.com", &password).unwrap();

    // Corrupt bob's envelope so retrieval fails; alice must still get
    // her token and the cycle must report only her.
    let mut corrupt = stack.creds.get("bob@example.com").unwrap().unwrap();
    corrupt.wrapped_dek = "AAAA".to_string();
    stack
        .creds
        .put("bob@example.com", &corrupt, Duration::from_secs(900))
        .unwrap();

    assert_eq!(stack.broker.refresh_cycle().await.unwrap(), 1);
    assert_eq!(mock.hits(), 1);
    assert!(stack
        .broker
        .current_token("alice@example.com")
        .unwrap()
        .is_some());
    assert!(stack
        .broker
        .current_token("bob@example.com")
        .unwrap()
        .is_none());
}
