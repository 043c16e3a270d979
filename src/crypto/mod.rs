//! Envelope-encryption primitive.
//!
//! Blobs are framed as `nonce (12 bytes) || ciphertext+tag`. The nonce
//! is freshly random per call and must never repeat for a given key.
//! AAD binds every blob to its principal and envelope layer so an
//! entry cannot be replayed for another user or swapped between the
//! password and data-key layers.

use crate::Error;
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Process-wide wrapping key, loaded once at startup. Lives only in
/// memory for the lifetime of the process.
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Decode a base64 master key from configuration.
    ///
    /// # Errors
    /// Returns an error if the value is not valid base64 or is not
    /// exactly 32 bytes. The error never echoes the input.
    pub fn from_base64(encoded: &SecretString) -> anyhow::Result<Self> {
        let decoded = Base64::decode_vec(encoded.expose_secret())
            .map_err(|_| anyhow::anyhow!("master key is not valid base64"))?;
        if decoded.len() != KEY_LEN {
            return Err(anyhow::anyhow!(
                "master key length is {}, expected {}",
                decoded.len(),
                KEY_LEN
            ));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Self(key))
    }

    #[cfg(test)]
    #[must_use]
    pub fn for_tests(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Generates a fresh 256-bit data key.
#[must_use]
pub fn generate_data_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypts `plaintext` under `key` with the given AAD.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns `Error::CryptoIntegrity` if the cipher rejects the input.
pub fn encrypt_with_key(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let key = Key::from_slice(key);
    let cipher = ChaCha20Poly1305::new(key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|_| Error::CryptoIntegrity)?;

    let mut blob = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);

    Ok(blob)
}

/// Decrypts a `nonce || ciphertext` blob under `key`.
///
/// # Errors
/// Returns `Error::CryptoIntegrity` on authentication-tag mismatch or
/// truncated input; it never returns altered plaintext.
pub fn decrypt_with_key(key: &[u8], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    if blob.len() < NONCE_LEN {
        return Err(Error::CryptoIntegrity);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = Key::from_slice(key);
    let cipher = ChaCha20Poly1305::new(key);

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|_| Error::CryptoIntegrity)
}

/// Same contract as [`encrypt_with_key`] against the process master key.
///
/// # Errors
/// Returns `Error::CryptoIntegrity` if the cipher rejects the input.
pub fn encrypt_with_master_key(
    master: &MasterKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    encrypt_with_key(&master.0, plaintext, aad)
}

/// Same contract as [`decrypt_with_key`] against the process master key.
///
/// # Errors
/// Returns `Error::CryptoIntegrity` on tag mismatch or truncated input.
pub fn decrypt_with_master_key(
    master: &MasterKey,
    blob: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    decrypt_with_key(&master.0, blob, aad)
}
