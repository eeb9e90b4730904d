//! genledger service - credit ledger and generation job backend.
//!
//! This is the main entry point for the genledger service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genledger_service::{create_router, AppState, MemoryObjectStore, ObjectStore, ServiceConfig};
use genledger_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,genledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting genledger service");

    let config = ServiceConfig::from_env();
    config.validate()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        worker_configured = %config.worker_url.is_some(),
        paystack_configured = %config.paystack_secret_key.is_some(),
        s3_bucket = ?config.s3_bucket,
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let objects = object_store(&config).await;

    let state = AppState::new(store, objects, config.clone());

    let _sweeper = state.guard.spawn_sweeper(Duration::from_secs(
        config.idempotency_sweep_interval_seconds.max(1),
    ));

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "s3")]
async fn object_store(config: &ServiceConfig) -> Arc<dyn ObjectStore> {
    if let Some(bucket) = &config.s3_bucket {
        tracing::info!(bucket = %bucket, endpoint = ?config.s3_endpoint, "Using S3 object store");
        return Arc::new(
            genledger_service::storage::S3ObjectStore::from_env(
                bucket.clone(),
                config.s3_endpoint.as_deref(),
            )
            .await,
        );
    }
    tracing::warn!("S3_BUCKET not set - generated files are kept in memory");
    Arc::new(MemoryObjectStore::new())
}

#[cfg(not(feature = "s3"))]
async fn object_store(config: &ServiceConfig) -> Arc<dyn ObjectStore> {
    if config.s3_bucket.is_some() {
        tracing::warn!("S3_BUCKET set but the s3 feature is disabled - using in-memory object store");
    } else {
        tracing::warn!("S3_BUCKET not set - generated files are kept in memory");
    }
    Arc::new(MemoryObjectStore::new())
}
