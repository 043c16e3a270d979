//! Background schedules for vault rotation and token refresh.
//!
//! Two independent, timer-driven loops owned by the server lifecycle.
//! Each cycle iterates a key-space snapshot taken at trigger time;
//! entries created after the snapshot are picked up on the next cycle.
//! Cycle errors are logged and never crash the scheduler. The loops
//! have no ordering guarantee relative to each other or to request
//! reads: the refresh cycle re-reads the vault immediately before use.

use crate::{broker::TokenBroker, vault::CredentialVault};
use std::time::Duration;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    /// Vault rotation period (`R_rotate < T_vault`).
    pub rotate_period: Duration,
    /// Token refresh period (`R_token < T_token`).
    pub refresh_period: Duration,
}

/// Handles to the two detached loops; aborted on shutdown.
pub struct Schedules {
    rotation: JoinHandle<()>,
    refresh: JoinHandle<()>,
}

impl Schedules {
    /// Starts both loops detached from any request context.
    #[must_use]
    pub fn spawn(vault: CredentialVault, broker: TokenBroker, config: ScheduleConfig) -> Self {
        info!(
            rotate_period = ?config.rotate_period,
            refresh_period = ?config.refresh_period,
            "Starting background schedules"
        );

        let rotation = tokio::spawn({
            let vault = vault.clone();
            async move {
                loop {
                    sleep(config.rotate_period).await;
                    match vault.rotate() {
                        Ok(rotated) => debug!(rotated, "Rotation cycle complete"),
                        Err(error) => error!(%error, "Rotation cycle failed"),
                    }
                }
            }
        });

        let refresh = tokio::spawn(async move {
            loop {
                sleep(config.refresh_period).await;
                match broker.refresh_cycle().await {
                    Ok(refreshed) => debug!(refreshed, "Refresh cycle complete"),
                    Err(error) => error!(%error, "Refresh cycle failed"),
                }
            }
        });

        Self { rotation, refresh }
    }

    /// Stops both loops. In-flight store writes complete on their own;
    /// no coordination beyond task abort is attempted.
    pub fn shutdown(self) {
        self.rotation.abort();
        self.refresh.abort();
        info!("Background schedules stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::MasterKey,
        store::{CredentialRepo, MemoryStore, TokenRepo, TtlStore},
    };
    use reqwest::Client;
    use secrecy::SecretString;
    use std::sync::Arc;

    fn fixture() -> (CredentialVault, TokenBroker, CredentialRepo) {
        let store: Arc<dyn TtlStore> = MemoryStore::shared();
        let creds = CredentialRepo::new(store.clone());
        let vault = CredentialVault::new(
            Arc::new(MasterKey::for_tests([5u8; 32])),
            CredentialRepo::new(store.clone()),
            TokenRepo::new(store.clone()),
            Duration::from_secs(900),
        );
        let broker = TokenBroker::new(
            Client::new(),
            vault.clone(),
            TokenRepo::new(store),
            "http://127.0.0.1:9/auth/token".to_string(),
            Duration::from_secs(300),
        );
        (vault, broker, creds)
    }

    #[tokio::test(start_paused = true)]
    #[allow(clippy::unwrap_used)]
    async fn test_rotation_loop_rewraps_entries() {
        let (vault, broker, creds) = fixture();
        vault
            .store("alice@example.com", &SecretString::from("pw1".to_string()))
            .unwrap();
        let before = creds.get("alice@example.com").unwrap().unwrap();

        let schedules = Schedules::spawn(
            vault.clone(),
            broker,
            ScheduleConfig {
                rotate_period: Duration::from_secs(10),
                // Keep the refresh loop quiet for this test.
                refresh_period: Duration::from_secs(3600),
            },
        );

        // Let the loop register its timer before moving the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(11)).await;
        // Give the spawned loop a chance to run its cycle.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        use secrecy::ExposeSecret;
        let after = creds.get("alice@example.com").unwrap().unwrap();
        assert_ne!(before.key_id, after.key_id);
        assert_eq!(
            vault.retrieve("alice@example.com").unwrap().expose_secret(),
            "pw1"
        );
        schedules.shutdown();
    }
}
