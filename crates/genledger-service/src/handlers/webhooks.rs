//! Webhook handlers for the generation worker and Paystack.
//!
//! Both senders sign the raw body with HMAC-SHA512 (hex). The signature is
//! checked before the body is parsed; a missing secret rejects everything.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use genledger_core::JobKind;

use crate::crypto::verify_hmac_sha512_hex;
use crate::error::ApiError;
use crate::jobs;
use crate::payments::{self, WebhookOutcome};
use crate::paystack::WebhookEvent;
use crate::state::AppState;
use crate::worker::WorkerCallback;

/// Header carrying the worker's signature.
pub const WORKER_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying Paystack's signature.
pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Webhook response. Duplicates are answered by `ApiError::AlreadyProcessed`.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

fn verify_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    header: &str,
    body: &[u8],
) -> Result<(), ApiError> {
    let Some(secret) = secret else {
        tracing::warn!(header = %header, "Webhook secret not configured - rejecting delivery");
        return Err(ApiError::Unauthorized);
    };

    let signature = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!(header = %header, "Webhook signature missing");
            ApiError::Unauthorized
        })?;

    if !verify_hmac_sha512_hex(secret.as_bytes(), body, signature) {
        tracing::warn!(header = %header, "Invalid webhook signature");
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

/// Handle a worker callback for jobs of `kind`.
pub async fn worker_callback(
    kind: JobKind,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    verify_signature(
        state.config.worker_webhook_secret.as_deref(),
        &headers,
        WORKER_SIGNATURE_HEADER,
        &body,
    )?;

    let callback: WorkerCallback =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        job_id = %callback.job_id,
        kind = kind.as_str(),
        status = %callback.report.status,
        "Received worker callback"
    );

    jobs::handle_callback(&state, kind, &callback).await?;

    Ok(Json(WebhookResponse { received: true }))
}

/// Handle Paystack webhooks.
pub async fn paystack_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    verify_signature(
        state.config.paystack_secret_key.as_deref(),
        &headers,
        PAYSTACK_SIGNATURE_HEADER,
        &body,
    )?;

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(event = %event.event, "Received Paystack webhook");

    match payments::handle_webhook(&state, &event).await? {
        WebhookOutcome::Duplicate => Err(ApiError::AlreadyProcessed),
        WebhookOutcome::Processed | WebhookOutcome::Ignored => {
            Ok(Json(WebhookResponse { received: true }))
        }
    }
}
