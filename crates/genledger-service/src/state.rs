//! Application state.

use std::sync::Arc;
use std::time::Duration;

use genledger_store::Store;

use crate::config::ServiceConfig;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::CreditLedger;
use crate::paystack::PaystackClient;
use crate::storage::ObjectStore;
use crate::worker::WorkerClient;

/// Timeout for artifact downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Object storage for generated files.
    pub objects: Arc<dyn ObjectStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// The credit ledger.
    pub ledger: CreditLedger,

    /// Callback idempotency guard.
    pub guard: IdempotencyGuard,

    /// Generation worker client (optional).
    pub worker: Option<Arc<WorkerClient>>,

    /// Paystack client for payments (optional).
    pub paystack: Option<Arc<PaystackClient>>,

    /// HTTP client for artifact downloads.
    pub http: reqwest::Client,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, objects: Arc<dyn ObjectStore>, config: ServiceConfig) -> Self {
        let worker = config.worker_url.as_ref().map(|url| {
            tracing::info!(worker_url = %url, "Generation worker enabled");
            Arc::new(WorkerClient::new(url, config.worker_api_key.clone()))
        });

        if worker.is_none() {
            tracing::warn!("Worker not configured - jobs cannot be dispatched");
        }
        if config.worker_webhook_secret.is_none() {
            tracing::warn!("Worker webhook secret not configured - worker callbacks will be rejected");
        }

        let paystack = config.paystack_secret_key.as_ref().map(|key| {
            tracing::info!(base_url = %config.paystack_base_url, "Paystack integration enabled");
            Arc::new(PaystackClient::new(&config.paystack_base_url, key))
        });

        if paystack.is_none() {
            tracing::warn!("Paystack not configured - payments will not be available");
        }

        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let ledger = CreditLedger::new(Arc::clone(&store), config.signup_credits);
        let guard = IdempotencyGuard::new(
            Arc::clone(&store),
            Duration::from_secs(config.idempotency_window_seconds),
        );

        Self {
            store,
            objects,
            config,
            ledger,
            guard,
            worker,
            paystack,
            http,
        }
    }

    /// Check if the worker is configured.
    #[must_use]
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Check if Paystack is configured.
    #[must_use]
    pub fn has_paystack(&self) -> bool {
        self.paystack.is_some()
    }
}
