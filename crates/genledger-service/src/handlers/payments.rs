//! Payment handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use genledger_core::Payment;

use super::{split_page, PageQuery};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::payments::{self, Checkout};
use crate::state::AppState;

/// Initialize payment request.
#[derive(Debug, Deserialize)]
pub struct InitializePaymentRequest {
    /// Amount in minor currency units.
    pub amount: i64,
    /// Receipt email; defaults to the one on record.
    #[serde(default)]
    pub email: Option<String>,
    /// Arbitrary metadata passed to the provider.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Start a checkout.
pub async fn initialize_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<InitializePaymentRequest>,
) -> Result<Json<Checkout>, ApiError> {
    let email = req
        .email
        .or_else(|| auth.user.email.clone())
        .ok_or_else(|| ApiError::BadRequest("email is required".into()))?;

    let checkout =
        payments::initialize(&state, &auth.user, req.amount, &email, req.metadata).await?;
    Ok(Json(checkout))
}

/// Payment response.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Payment reference.
    pub reference: String,
    /// `PENDING`, `SUCCESS` or `FAILED`.
    pub status: &'static str,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency code.
    pub currency: String,
    /// Credits granted on success.
    pub credits: i64,
    /// Created.
    pub created_at: String,
    /// Last change.
    pub updated_at: String,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            reference: payment.reference.clone(),
            status: payment.status.as_str(),
            amount: payment.amount_minor,
            currency: payment.currency.clone(),
            credits: payment.credits,
            created_at: payment.created_at.to_rfc3339(),
            updated_at: payment.updated_at.to_rfc3339(),
        }
    }
}

/// Verify and settle a payment.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(reference): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = payments::verify(&state, &auth.user, &reference).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// List payments response.
#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    /// Payments (newest first).
    pub payments: Vec<PaymentResponse>,
    /// Whether there are more payments.
    pub has_more: bool,
}

/// List the caller's payments.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListPaymentsResponse>, ApiError> {
    let limit = query.limit();
    let payments = state
        .store
        .list_payments_by_user(&auth.user.id, limit + 1, query.offset)
        .await?;

    let (payments, has_more) = split_page(payments, limit);

    Ok(Json(ListPaymentsResponse {
        payments: payments.iter().map(PaymentResponse::from).collect(),
        has_more,
    }))
}
