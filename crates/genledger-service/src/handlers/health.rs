//! Health check handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether jobs can be dispatched.
    pub worker: bool,
    /// Whether payments are available.
    pub payments: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "genledger".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        worker: state.has_worker(),
        payments: state.has_paystack(),
    })
}
