//! # Sensegate (Credential Custodian & Processing Proxy)
//!
//! `sensegate` sits between the research platform and the Sense
//! processing microservice, which only accepts username/password
//! authentication. It keeps an envelope-encrypted, TTL-bound copy of a
//! user's password, brokers a short-lived delegated bearer token from
//! it, and forwards aggregation, lookup and export requests to the
//! (slow, occasionally flaky) downstream as one coherent call.
//!
//! ## Credential custody
//!
//! Passwords are stored under two-layer envelope encryption: the
//! password is sealed with a fresh per-store data key, and the data key
//! is sealed with the process master key. The wrapping key is rotated
//! on a schedule shorter than the credential TTL, so a continuously
//! active user never re-enters a password while the entry stays warm.
//!
//! ## Token brokerage
//!
//! A second scheduled loop exchanges vaulted passwords for opaque
//! downstream bearer tokens, cached with a shorter TTL. The request
//! path only ever performs a cached read; all network traffic to the
//! token authority happens at login or inside the refresh cycle.
//!
//! ## Streaming proxy
//!
//! Aggregation responses arrive as an NDJSON stream of partial chunks.
//! The proxy applies one end-to-end timeout to the whole stream,
//! retries the entire stream for transient causes only, and merges the
//! chunks into a single result before returning it upward.

pub mod api;
pub mod broker;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod schedule;
pub mod store;
pub mod vault;

pub use error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
