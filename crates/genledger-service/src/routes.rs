//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use bytes::Bytes;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use genledger_core::JobKind;

use crate::handlers::{admin, credits, files, health, jobs, payments, subscriptions, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Maximum concurrent job creations. Each one holds a worker call open.
const JOBS_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/transactions` - Transaction history
///
/// ## Jobs & Files (JWT auth)
/// - `POST /v1/jobs` - Charge for and dispatch a generation job
/// - `GET /v1/jobs` - List own jobs
/// - `GET /v1/jobs/:id` - Job status, refreshed from the worker
/// - `GET /v1/files/:id` - File metadata and download URL
/// - `DELETE /v1/files/:id` - Delete a file
/// - `GET /v1/storage/objects` - List own object keys
///
/// ## Payments & Subscriptions (JWT auth)
/// - `POST /v1/payments/initialize` - Start a checkout
/// - `GET /v1/payments/verify/:reference` - Verify and settle a payment
/// - `GET /v1/payments` - List own payments
/// - `GET /v1/subscriptions/me` - Active subscription
/// - `POST /v1/subscriptions/:id/cancel` - Cancel a subscription
///
/// ## Admin (admin API key)
/// - `POST /v1/admin/credits` - Grant credits
/// - `PUT /v1/admin/plans/:code` - Create or replace a plan
///
/// ## Webhooks (HMAC-SHA512 signature)
/// - `POST /webhooks/{kind}-completion` - Worker callbacks, one per job kind
/// - `POST /webhooks/paystack` - Paystack events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let job_routes = Router::new()
        .route("/", post(jobs::create_job).get(jobs::list_jobs))
        .layer(ConcurrencyLimitLayer::new(JOBS_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        // Jobs
        .nest("/jobs", job_routes)
        .route("/jobs/:id", get(jobs::get_job))
        // Files
        .route("/files/:id", get(files::get_file).delete(files::delete_file))
        .route("/storage/objects", get(files::list_objects))
        // Payments
        .route("/payments", get(payments::list_payments))
        .route("/payments/initialize", post(payments::initialize_payment))
        .route("/payments/verify/:reference", get(payments::verify_payment))
        // Subscriptions
        .route("/subscriptions/me", get(subscriptions::my_subscription))
        .route(
            "/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        // Admin
        .route("/admin/credits", post(admin::grant_credits))
        .route("/admin/plans/:code", put(admin::put_plan))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    // Webhooks (no rate limit - controlled by external services)
    let mut webhook_routes =
        Router::new().route("/webhooks/paystack", post(webhooks::paystack_webhook));
    for kind in JobKind::ALL {
        webhook_routes = webhook_routes.route(
            &format!("/webhooks/{}-completion", kind.as_str()),
            post(
                move |state: State<Arc<AppState>>, headers: HeaderMap, body: Bytes| {
                    webhooks::worker_callback(kind, state, headers, body)
                },
            ),
        );
    }

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .merge(webhook_routes)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
