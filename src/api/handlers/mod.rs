pub mod health;
pub mod process;
pub mod session;

// common functions for the handlers
use crate::Error;
use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde_json::json;

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// The surrounding platform authenticates the session and forwards the
/// principal identity in this header.
pub const PRINCIPAL_HEADER: &str = "x-principal";

/// # Errors
/// Returns `Error::AuthRequired` when the header is absent or empty.
pub fn require_principal(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|principal| !principal.is_empty())
        .map(ToString::to_string)
        .ok_or(ApiError(Error::AuthRequired))
}

/// Wrapper mapping the domain taxonomy onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::AuthRequired => error_response(StatusCode::UNAUTHORIZED, &self.0),
            Error::NotFound => error_response(StatusCode::NOT_FOUND, &self.0),
            Error::NoData => error_response(StatusCode::NOT_FOUND, &self.0),
            Error::Validation(_) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &self.0),
            // 4xx from downstream pass through status and body verbatim.
            Error::UpstreamClient { status, body } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                body,
            )
                .into_response(),
            Error::UpstreamServer { .. } => error_response(StatusCode::BAD_GATEWAY, &self.0),
            Error::Timeout => error_response(StatusCode::GATEWAY_TIMEOUT, &self.0),
            Error::CryptoIntegrity | Error::StoreUnavailable => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.0)
            }
        }
    }
}

fn error_response(status: StatusCode, error: &Error) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
