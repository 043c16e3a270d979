use thiserror::Error;

/// Domain error taxonomy surfaced by the vault, broker and proxy.
///
/// Messages never carry plaintext, key material or tokens; upstream
/// bodies are preserved verbatim for user-facing rendering because the
/// downstream never echoes credentials back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("ciphertext integrity check failed")]
    CryptoIntegrity,
    #[error("no stored entry for principal")]
    NotFound,
    #[error("credential store unavailable")]
    StoreUnavailable,
    #[error("no valid token available, authentication required")]
    AuthRequired,
    #[error("upstream rejected request: {status}")]
    UpstreamClient { status: u16, body: String },
    #[error("upstream failure (status {status:?})")]
    UpstreamServer { status: Option<u16>, body: String },
    #[error("upstream call timed out")]
    Timeout,
    #[error("stream closed without yielding any chunk")]
    NoData,
    #[error("{0}")]
    Validation(String),
}

impl Error {
    /// Transient causes worth retrying: 5xx, transport I/O and
    /// timeouts. 4xx, validation and crypto failures are terminal.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::UpstreamServer { .. } | Self::Timeout)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err.status() {
            Some(status) if status.is_client_error() => Self::UpstreamClient {
                status: status.as_u16(),
                body: String::new(),
            },
            Some(status) => Self::UpstreamServer {
                status: Some(status.as_u16()),
                body: String::new(),
            },
            // Connection resets and other transport faults carry no
            // HTTP status; they count as server-side failures for the
            // retry policy.
            None => Self::UpstreamServer {
                status: None,
                body: err.without_url().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(Error::Timeout.is_retriable());
        assert!(Error::UpstreamServer {
            status: Some(503),
            body: String::new()
        }
        .is_retriable());
        assert!(!Error::UpstreamClient {
            status: 400,
            body: String::new()
        }
        .is_retriable());
        assert!(!Error::CryptoIntegrity.is_retriable());
        assert!(!Error::Validation("bad facility".to_string()).is_retriable());
        assert!(!Error::NoData.is_retriable());
    }

    #[test]
    fn test_messages_carry_no_payload() {
        let err = Error::CryptoIntegrity;
        assert!(!err.to_string().contains("key"));
        let err = Error::NotFound;
        assert!(!err.to_string().to_lowercase().contains("password"));
    }
}
