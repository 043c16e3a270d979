//! TTL-bound password custody with scheduled key rotation.
//!
//! Each entry is a two-layer envelope: the password is sealed under a
//! per-store data key and the data key is sealed under the process
//! master key. Rotation re-seals every live entry under a brand-new
//! data key and resets its TTL, so a continuously-active principal's
//! entry never expires while the scheduler runs. Logout purges the
//! entry explicitly (see DESIGN.md).

use crate::{
    Error,
    crypto::{self, MasterKey},
    store::{CredentialRepo, TokenRepo, VaultEntry},
};
use base64ct::{Base64, Encoding};
use secrecy::{ExposeSecret, SecretString};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

fn password_aad(principal: &str) -> Vec<u8> {
    format!("cred:v1|{principal}").into_bytes()
}

fn dek_aad(principal: &str) -> Vec<u8> {
    format!("dek:v1|{principal}").into_bytes()
}

#[derive(Clone)]
pub struct CredentialVault {
    master: Arc<MasterKey>,
    creds: CredentialRepo,
    tokens: TokenRepo,
    ttl: Duration,
}

impl CredentialVault {
    #[must_use]
    pub fn new(
        master: Arc<MasterKey>,
        creds: CredentialRepo,
        tokens: TokenRepo,
        ttl: Duration,
    ) -> Self {
        Self {
            master,
            creds,
            tokens,
            ttl,
        }
    }

    /// Stores an envelope-encrypted copy of the password, overwriting
    /// any prior entry and resetting the TTL.
    ///
    /// # Errors
    /// Returns `Error::CryptoIntegrity` if sealing fails or
    /// `Error::StoreUnavailable` if the store rejects the write.
    #[instrument(skip(self, password))]
    pub fn store(&self, principal: &str, password: &SecretString) -> Result<(), Error> {
        let dek = crypto::generate_data_key();
        let wrapped_password = crypto::encrypt_with_key(
            &dek,
            password.expose_secret().as_bytes(),
            &password_aad(principal),
        )?;
        let wrapped_dek =
            crypto::encrypt_with_master_key(&self.master, &dek, &dek_aad(principal))?;

        let entry = VaultEntry {
            wrapped_password: Base64::encode_string(&wrapped_password),
            wrapped_dek: Base64::encode_string(&wrapped_dek),
            key_id: Uuid::new_v4(),
            expires_at: SystemTime::now() + self.ttl,
        };

        self.creds.put(principal, &entry, self.ttl)?;
        info!(key_id = %entry.key_id, "Stored credential entry");
        Ok(())
    }

    /// Unwraps and returns the plaintext password.
    ///
    /// # Errors
    /// `Error::NotFound` if no live entry exists, `Error::CryptoIntegrity`
    /// if either envelope layer fails authentication.
    #[instrument(skip(self))]
    pub fn retrieve(&self, principal: &str) -> Result<SecretString, Error> {
        let entry = self.creds.get(principal)?.ok_or(Error::NotFound)?;
        let password = self.open_entry(principal, &entry)?;
        String::from_utf8(password)
            .map(SecretString::from)
            .map_err(|_| Error::CryptoIntegrity)
    }

    /// Re-seals every live entry under a brand-new data key and resets
    /// its TTL. Per-entry failures are logged and skipped; they never
    /// abort the cycle for other principals.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` only if the key snapshot
    /// itself cannot be taken.
    #[instrument(skip(self))]
    pub fn rotate(&self) -> Result<usize, Error> {
        let principals = self.creds.principals()?;
        if principals.is_empty() {
            info!("No credential entries to rotate");
            return Ok(0);
        }

        info!("Rotating {} credential entries", principals.len());
        let mut rotated = 0;
        for principal in &principals {
            match self.rotate_one(principal) {
                Ok(true) => rotated += 1,
                // Entry expired between snapshot and read.
                Ok(false) => {}
                Err(error) => {
                    warn!(%error, "Rotation failed for one entry, skipping");
                }
            }
        }
        Ok(rotated)
    }

    fn rotate_one(&self, principal: &str) -> Result<bool, Error> {
        let Some(entry) = self.creds.get(principal)? else {
            return Ok(false);
        };

        let password = self.open_entry(principal, &entry)?;

        let new_dek = crypto::generate_data_key();
        let wrapped_password =
            crypto::encrypt_with_key(&new_dek, &password, &password_aad(principal))?;
        let wrapped_dek =
            crypto::encrypt_with_master_key(&self.master, &new_dek, &dek_aad(principal))?;

        let new_entry = VaultEntry {
            wrapped_password: Base64::encode_string(&wrapped_password),
            wrapped_dek: Base64::encode_string(&wrapped_dek),
            key_id: Uuid::new_v4(),
            expires_at: SystemTime::now() + self.ttl,
        };
        self.creds.put(principal, &new_entry, self.ttl)?;

        info!(
            old_key_id = %entry.key_id,
            new_key_id = %new_entry.key_id,
            "Rotated credential entry"
        );
        Ok(true)
    }

    /// Snapshot of principals with a live credential entry.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn principals(&self) -> Result<Vec<String>, Error> {
        self.creds.principals()
    }

    /// Deletes the principal's credential and token entries (logout).
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    #[instrument(skip(self))]
    pub fn purge(&self, principal: &str) -> Result<(), Error> {
        let removed = self.creds.delete(principal)? + self.tokens.delete(principal)?;
        info!(removed, "Purged principal entries");
        Ok(())
    }

    fn open_entry(&self, principal: &str, entry: &VaultEntry) -> Result<Vec<u8>, Error> {
        let wrapped_dek =
            Base64::decode_vec(&entry.wrapped_dek).map_err(|_| Error::CryptoIntegrity)?;
        let wrapped_password =
            Base64::decode_vec(&entry.wrapped_password).map_err(|_| Error::CryptoIntegrity)?;

        let dek = crypto::decrypt_with_master_key(&self.master, &wrapped_dek, &dek_aad(principal))?;
        crypto::decrypt_with_key(&dek, &wrapped_password, &password_aad(principal))
    }
}
