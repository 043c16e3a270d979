//! Delegated bearer-token brokerage.
//!
//! Exchanges a vaulted password for an opaque downstream token via the
//! credentials grant, caches it with a TTL shorter than the vault's,
//! and refreshes it on a schedule shorter than the token TTL. The
//! request path never touches the network: `current_token` is a pure
//! cached read.

use crate::{
    Error,
    store::{TokenEntry, TokenRepo},
    vault::CredentialVault,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

const FETCH_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct TokenBroker {
    client: Client,
    vault: CredentialVault,
    tokens: TokenRepo,
    auth_url: String,
    token_ttl: Duration,
    backoff_base: Duration,
}

impl TokenBroker {
    #[must_use]
    pub fn new(
        client: Client,
        vault: CredentialVault,
        tokens: TokenRepo,
        auth_url: String,
        token_ttl: Duration,
    ) -> Self {
        Self {
            client,
            vault,
            tokens,
            auth_url,
            token_ttl,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Overrides the retry backoff base (tests use milliseconds).
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Exchanges credentials for an opaque token and caches it.
    ///
    /// Up to three attempts with exponential backoff. On total failure
    /// any previously cached token is left untouched: stale but
    /// available beats none.
    ///
    /// # Errors
    /// Returns the last attempt's error once the retry budget is spent.
    #[instrument(skip(self, password))]
    pub async fn fetch_and_store(
        &self,
        principal: &str,
        password: &SecretString,
    ) -> Result<(), Error> {
        let mut last_error = Error::AuthRequired;

        for attempt in 1..=FETCH_ATTEMPTS {
            if attempt > 1 {
                let backoff = self.backoff_base * 2u32.pow(attempt - 2);
                warn!("Backing off for {:?} before attempt {}", backoff, attempt);
                sleep(backoff).await;
            }

            match self.request_token(principal, password).await {
                Ok(token) => {
                    let entry = TokenEntry {
                        token,
                        expires_at: SystemTime::now() + self.token_ttl,
                    };
                    self.tokens.put(principal, &entry, self.token_ttl)?;
                    info!("Stored fresh token");
                    return Ok(());
                }
                Err(error) => {
                    warn!(%error, attempt, "Token fetch failed");
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    async fn request_token(&self, principal: &str, password: &SecretString) -> Result<String, Error> {
        let span = info_span!("auth.token", http.method = "POST", url = %self.auth_url);
        let response = self
            .client
            .post(&self.auth_url)
            .form(&[
                ("username", principal),
                ("password", password.expose_secret()),
                ("grant_type", "password"),
            ])
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(Error::UpstreamClient {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(Error::UpstreamServer {
                status: Some(status.as_u16()),
                body,
            });
        }

        // The authority returns the bearer token as an opaque body.
        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(Error::UpstreamServer {
                status: Some(status.as_u16()),
                body: "empty token body".to_string(),
            });
        }
        Ok(token)
    }

    /// Cached token read; never performs network I/O.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure. `Ok(None)`
    /// means no live token is available.
    pub fn current_token(&self, principal: &str) -> Result<Option<String>, Error> {
        let Some(entry) = self.tokens.get(principal)? else {
            return Ok(None);
        };
        if entry.expires_at < SystemTime::now() {
            debug!("Cached token expired");
            return Ok(None);
        }
        Ok(Some(entry.token))
    }

    /// Refreshes tokens for every principal with a live vault entry.
    ///
    /// Principals whose vault entry expired between snapshot and read
    /// are silently skipped. Per-principal failures never abort the
    /// cycle for the rest.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` only if the key snapshot
    /// itself cannot be taken.
    #[instrument(skip(self))]
    pub async fn refresh_cycle(&self) -> Result<usize, Error> {
        let principals = self.vault.principals()?;
        if principals.is_empty() {
            debug!("No active principals for token refresh");
            return Ok(0);
        }

        info!("Refreshing tokens for {} principals", principals.len());
        let mut refreshed = 0;
        for principal in &principals {
            let password = match self.vault.retrieve(principal) {
                Ok(password) => password,
                Err(Error::NotFound) => continue,
                Err(error) => {
                    warn!(%error, "Skipping principal in refresh cycle");
                    continue;
                }
            };

            match self.fetch_and_store(principal, &password).await {
                Ok(()) => refreshed += 1,
                Err(error) => {
                    warn!(%error, "Token refresh failed for one principal");
                }
            }
        }
        Ok(refreshed)
    }
}
