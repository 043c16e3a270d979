//! Keyed TTL store and the typed repositories on top of it.
//!
//! The store itself only understands `set-with-TTL`, `get`,
//! `delete-by-pattern` and `enumerate-keys`. Key formats
//! (`cred:{principal}`, `token:{principal}`) live exclusively in the
//! repositories so no other component ever assembles a raw key.
//! Overwrite-on-write is the whole concurrency story: each principal's
//! entries have exactly one logical writer role at a time (login,
//! rotation or refresh) and last-write-wins is acceptable for all of
//! them.

use crate::Error;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};
use tokio::time::Instant;
use uuid::Uuid;

/// Minimal keyed TTL store contract.
pub trait TtlStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value and
    /// resetting its lifetime to `ttl`.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the backend is unusable.
    fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error>;

    /// Reads a live value; expired entries read as absent.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the backend is unusable.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Deletes every key matching `pattern`, returning the count.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the backend is unusable.
    fn delete_by_pattern(&self, pattern: &str) -> Result<usize, Error>;

    /// Snapshot of the live keys matching `pattern`.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` if the backend is unusable.
    fn keys(&self, pattern: &str) -> Result<Vec<String>, Error>;
}

/// A trailing `*` matches any suffix; any other pattern is an exact
/// key. Exact matching matters for deletes: one principal must never
/// be a prefix-match for another (`bob@x.co` vs `bob@x.com`).
fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

struct Stored {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process implementation backed by a `RwLock<HashMap>`.
///
/// Expiry is driven by `tokio::time::Instant`, so tests running under
/// a paused runtime clock can advance it deterministically.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Stored>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl TtlStore for MemoryStore {
    fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        let mut entries = self.entries.write().map_err(|_| Error::StoreUnavailable)?;
        entries.insert(
            key.to_string(),
            Stored {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let entries = self.entries.read().map_err(|_| Error::StoreUnavailable)?;
        Ok(entries
            .get(key)
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.value.clone()))
    }

    fn delete_by_pattern(&self, pattern: &str) -> Result<usize, Error> {
        let mut entries = self.entries.write().map_err(|_| Error::StoreUnavailable)?;
        let before = entries.len();
        entries.retain(|key, _| !key_matches(pattern, key));
        Ok(before - entries.len())
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let mut entries = self.entries.write().map_err(|_| Error::StoreUnavailable)?;
        // Enumeration doubles as the sweep for expired entries.
        let now = Instant::now();
        entries.retain(|_, stored| stored.expires_at > now);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key_matches(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Envelope-encrypted credential copy for one principal.
///
/// Two-layer envelope: `wrapped_password` needs the data key,
/// `wrapped_dek` needs the master key. `key_id` names the wrapping
/// generation and is the only identifier safe to log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    pub wrapped_password: String,
    pub wrapped_dek: String,
    pub key_id: Uuid,
    pub expires_at: SystemTime,
}

/// Opaque downstream bearer token for one principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub expires_at: SystemTime,
}

const CRED_PREFIX: &str = "cred:";
const TOKEN_PREFIX: &str = "token:";

fn put_json<T: Serialize>(
    store: &dyn TtlStore,
    key: &str,
    entry: &T,
    ttl: Duration,
) -> Result<(), Error> {
    let bytes = serde_json::to_vec(entry).map_err(|_| Error::StoreUnavailable)?;
    store.set_with_ttl(key, bytes, ttl)
}

fn get_json<T: DeserializeOwned>(store: &dyn TtlStore, key: &str) -> Result<Option<T>, Error> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|_| Error::StoreUnavailable),
        None => Ok(None),
    }
}

/// Typed repository for `cred:{principal}` entries.
#[derive(Clone)]
pub struct CredentialRepo {
    store: Arc<dyn TtlStore>,
}

impl CredentialRepo {
    #[must_use]
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn put(&self, principal: &str, entry: &VaultEntry, ttl: Duration) -> Result<(), Error> {
        put_json(
            self.store.as_ref(),
            &format!("{CRED_PREFIX}{principal}"),
            entry,
            ttl,
        )
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn get(&self, principal: &str) -> Result<Option<VaultEntry>, Error> {
        get_json(self.store.as_ref(), &format!("{CRED_PREFIX}{principal}"))
    }

    /// Snapshot of principals with a live credential entry.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn principals(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .store
            .keys(&format!("{CRED_PREFIX}*"))?
            .iter()
            .filter_map(|key| key.strip_prefix(CRED_PREFIX))
            .map(ToString::to_string)
            .collect())
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn delete(&self, principal: &str) -> Result<usize, Error> {
        self.store
            .delete_by_pattern(&format!("{CRED_PREFIX}{principal}"))
    }
}

/// Typed repository for `token:{principal}` entries.
#[derive(Clone)]
pub struct TokenRepo {
    store: Arc<dyn TtlStore>,
}

impl TokenRepo {
    #[must_use]
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn put(&self, principal: &str, entry: &TokenEntry, ttl: Duration) -> Result<(), Error> {
        put_json(
            self.store.as_ref(),
            &format!("{TOKEN_PREFIX}{principal}"),
            entry,
            ttl,
        )
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn get(&self, principal: &str) -> Result<Option<TokenEntry>, Error> {
        get_json(self.store.as_ref(), &format!("{TOKEN_PREFIX}{principal}"))
    }

    /// # Errors
    /// Returns `Error::StoreUnavailable` on backend failure.
    pub fn delete(&self, principal: &str) -> Result<usize, Error> {
        self.store
            .delete_by_pattern(&format!("{TOKEN_PREFIX}{principal}"))
    }
}
