//! Callback idempotency guard.
//!
//! Each inbound callback is admitted at most once per window by an atomic
//! insert-if-absent on the shared processed-callback table. Expired claims
//! are replaced on admission and purged by a background sweep. Past the
//! window, redelivery is re-admitted and the store's terminal-state checks
//! keep it harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use genledger_core::JobId;
use genledger_store::Store;

use crate::error::ApiError;

/// Key guarding a job's terminal transition.
#[must_use]
pub fn job_terminal_key(job_id: &JobId) -> String {
    format!("job:{job_id}:terminal")
}

/// Key guarding a payment's settlement.
#[must_use]
pub fn payment_key(reference: &str) -> String {
    format!("payment:{reference}")
}

/// Time-windowed admission of correlation keys.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    window: chrono::Duration,
}

impl IdempotencyGuard {
    /// Create a guard holding claims for `window`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::minutes(5));
        Self { store, window }
    }

    /// Claim `key`. Returns `false` when an unexpired claim already exists.
    pub async fn admit(&self, key: &str) -> Result<bool, ApiError> {
        let admitted = self
            .store
            .claim_callback(key, Utc::now() + self.window)
            .await?;
        if !admitted {
            tracing::info!(key = %key, "Duplicate callback suppressed");
        }
        Ok(admitted)
    }

    /// Drop a claim after processing failed, so a retry is not swallowed.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.release_callback(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to release callback claim");
        }
    }

    /// Purge expired claims every `interval` until the runtime shuts down.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.purge_expired_callbacks(Utc::now()).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged = purged, "Expired callback claims purged"),
                    Err(e) => tracing::warn!(error = %e, "Callback claim sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genledger_store::MemoryStore;

    #[tokio::test]
    async fn second_admission_is_refused() {
        let guard = IdempotencyGuard::new(Arc::new(MemoryStore::new()), Duration::from_secs(300));
        assert!(guard.admit("job:1:terminal").await.unwrap());
        assert!(!guard.admit("job:1:terminal").await.unwrap());
        assert!(guard.admit("job:2:terminal").await.unwrap());
    }

    #[tokio::test]
    async fn released_key_is_admitted_again() {
        let guard = IdempotencyGuard::new(Arc::new(MemoryStore::new()), Duration::from_secs(300));
        assert!(guard.admit("payment:ref").await.unwrap());
        guard.release("payment:ref").await;
        assert!(guard.admit("payment:ref").await.unwrap());
    }

    #[tokio::test]
    async fn expired_claim_is_readmitted() {
        let guard = IdempotencyGuard::new(Arc::new(MemoryStore::new()), Duration::ZERO);
        assert!(guard.admit("job:1:terminal").await.unwrap());
        assert!(guard.admit("job:1:terminal").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_claims() {
        let store = Arc::new(MemoryStore::new());
        let guard = IdempotencyGuard::new(store.clone(), Duration::ZERO);
        guard.admit("job:1:terminal").await.unwrap();

        let handle = guard.spawn_sweeper(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.abort();

        assert_eq!(store.purge_expired_callbacks(Utc::now()).await.unwrap(), 0);
    }

    #[test]
    fn keys_are_namespaced() {
        let id = JobId::generate();
        assert_eq!(job_terminal_key(&id), format!("job:{id}:terminal"));
        assert_eq!(payment_key("ref_1"), "payment:ref_1");
    }
}
