use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

/// Process-wide configuration gathered from the CLI/environment.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    /// Base64-encoded 256-bit master key; never logged.
    pub master_key: SecretString,
    /// Token authority endpoint (credentials grant).
    pub auth_url: String,
    /// Base URL of the processing microservice.
    pub processing_url: String,
    pub vault_ttl: Duration,
    pub token_ttl: Duration,
    pub rotate_period: Duration,
    pub refresh_period: Duration,
}

impl GlobalArgs {
    /// Enforces `refresh_period < token_ttl < vault_ttl` and
    /// `rotate_period < vault_ttl`, the invariant that guarantees a
    /// continuously-active principal never observes a missing token
    /// between refresh cycles.
    ///
    /// # Errors
    /// Returns an error naming the violated relation.
    pub fn validate(&self) -> Result<()> {
        check_url("auth-url", &self.auth_url)?;
        check_url("processing-url", &self.processing_url)?;

        if self.refresh_period >= self.token_ttl {
            anyhow::bail!(
                "refresh period ({:?}) must be shorter than the token TTL ({:?})",
                self.refresh_period,
                self.token_ttl
            );
        }
        if self.token_ttl >= self.vault_ttl {
            anyhow::bail!(
                "token TTL ({:?}) must be shorter than the vault TTL ({:?})",
                self.token_ttl,
                self.vault_ttl
            );
        }
        if self.rotate_period >= self.vault_ttl {
            anyhow::bail!(
                "rotation period ({:?}) must be shorter than the vault TTL ({:?})",
                self.rotate_period,
                self.vault_ttl
            );
        }
        Ok(())
    }
}

fn check_url(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| anyhow::anyhow!("invalid {name}: {e}"))?;

    if url.host().is_none() {
        anyhow::bail!("invalid {name}: no host specified");
    }
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => anyhow::bail!("invalid {name}: unsupported scheme {scheme}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> GlobalArgs {
        GlobalArgs {
            master_key: SecretString::default(),
            auth_url: "https://auth.example.com/token".to_string(),
            processing_url: "https://processing.example.com".to_string(),
            vault_ttl: Duration::from_secs(900),
            token_ttl: Duration::from_secs(300),
            rotate_period: Duration::from_secs(870),
            refresh_period: Duration::from_secs(270),
        }
    }

    #[test]
    fn test_default_intervals_validate() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn test_refresh_must_undercut_token_ttl() {
        let mut args = args();
        args.refresh_period = Duration::from_secs(300);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_token_ttl_must_undercut_vault_ttl() {
        let mut args = args();
        args.token_ttl = Duration::from_secs(900);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rotation_must_undercut_vault_ttl() {
        let mut args = args();
        args.rotate_period = Duration::from_secs(1000);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_urls() {
        let mut bad_auth = args();
        bad_auth.auth_url = "not a url".to_string();
        assert!(bad_auth.validate().is_err());

        let mut bad_scheme = args();
        bad_scheme.processing_url = "ftp://processing.example.com".to_string();
        assert!(bad_scheme.validate().is_err());
    }
}
