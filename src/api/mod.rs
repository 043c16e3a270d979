use crate::{
    broker::TokenBroker,
    cli::globals::GlobalArgs,
    crypto::MasterKey,
    proxy::ProcessingProxy,
    schedule::{ScheduleConfig, Schedules},
    store::{CredentialRepo, MemoryStore, TokenRepo, TtlStore},
    vault::CredentialVault,
};
use anyhow::Result;
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use reqwest::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// Shared state for the request path: the custodian, the broker and
/// the proxy. Background schedules are owned by the server, not the
/// state.
pub struct AppState {
    pub vault: CredentialVault,
    pub broker: TokenBroker,
    pub proxy: ProcessingProxy,
}

/// Start the server
///
/// # Errors
/// Returns an error if the master key is invalid, the HTTP client
/// cannot be built, or the listener cannot bind.
pub async fn new(port: u16, globals: &GlobalArgs) -> Result<()> {
    let master = Arc::new(MasterKey::from_base64(&globals.master_key)?);

    let store: Arc<dyn TtlStore> = MemoryStore::shared();
    let creds = CredentialRepo::new(store.clone());
    let tokens = TokenRepo::new(store.clone());

    let vault = CredentialVault::new(master, creds, tokens, globals.vault_ttl);

    let client = Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .build()?;

    let broker = TokenBroker::new(
        client.clone(),
        vault.clone(),
        TokenRepo::new(store),
        globals.auth_url.clone(),
        globals.token_ttl,
    );

    let proxy = ProcessingProxy::new(client, broker.clone(), globals.processing_url.clone());

    let schedules = Schedules::spawn(
        vault.clone(),
        broker.clone(),
        ScheduleConfig {
            rotate_period: globals.rotate_period,
            refresh_period: globals.refresh_period,
        },
    );

    let state = Arc::new(AppState {
        vault,
        broker,
        proxy,
    });

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-principal"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    schedules.shutdown();

    Ok(())
}

/// Routes only; layers and docs are attached in [`new`].
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::health::health))
        .route("/v1/session/login", post(handlers::session::login))
        .route("/v1/session/logout", post(handlers::session::logout))
        .route("/v1/process", post(handlers::process::process))
        .route(
            "/v1/radio/devices_at_time",
            post(handlers::process::radio_devices_at_time),
        )
        .route(
            "/v1/thermalmap/reading_at_time",
            post(handlers::process::thermalmap_reading_at_time),
        )
        .route("/v1/export", post(handlers::process::export))
        .layer(Extension(state))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
