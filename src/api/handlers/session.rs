//! Login/logout hooks for the credential custodian.
//!
//! Session issuance and verification belong to the surrounding
//! platform; these endpoints only maintain the vaulted credential copy
//! and the brokered token derived from it.

use super::{ApiError, require_principal, valid_email};
use crate::{Error, api::AppState};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// Redact the password from any debug rendering.
impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[utoipa::path(
    post,
    path = "/v1/session/login",
    request_body = LoginRequest,
    responses(
        (status = 202, description = "Credential vaulted, token fetch started"),
        (status = 422, description = "Malformed username or missing payload")
    ),
    tag = "session"
)]
#[instrument(skip(state, payload))]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(login)) = payload else {
        return Err(Error::Validation("missing payload".to_string()).into());
    };
    if !valid_email(&login.username) {
        return Err(Error::Validation("username must be an email address".to_string()).into());
    }

    let password = SecretString::from(login.password);
    state.vault.store(&login.username, &password)?;

    // First token fetch runs off the request path; the refresh cycle
    // repairs a failed attempt.
    let broker = state.broker.clone();
    let principal = login.username.clone();
    tokio::spawn(async move {
        if let Err(error) = broker.fetch_and_store(&principal, &password).await {
            warn!(%error, "Initial token fetch failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

#[utoipa::path(
    post,
    path = "/v1/session/logout",
    responses(
        (status = 204, description = "Credential and token entries purged"),
        (status = 401, description = "Missing principal header")
    ),
    tag = "session"
)]
#[instrument(skip(state, headers))]
pub async fn logout(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    state.vault.purge(&principal)?;
    Ok(StatusCode::NO_CONTENT)
}
