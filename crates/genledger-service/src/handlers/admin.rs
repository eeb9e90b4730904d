//! Admin handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use genledger_core::{BillingInterval, Plan, TransactionType, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Grant credits request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Target user.
    pub user_id: UserId,
    /// Credits to add.
    pub amount: i64,
    /// `BONUS` (default), `REFUND` or `PURCHASE`.
    #[serde(default)]
    pub transaction_type: Option<String>,
    /// Reason shown in the transaction history.
    pub reason: String,
}

/// Grant credits response.
#[derive(Debug, Serialize)]
pub struct GrantCreditsResponse {
    /// Transaction ID.
    pub transaction_id: String,
    /// New balance.
    pub balance: i64,
}

/// Add credits to a user's balance.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(req): Json<GrantCreditsRequest>,
) -> Result<Json<GrantCreditsResponse>, ApiError> {
    let transaction_type = match req.transaction_type.as_deref() {
        None => TransactionType::Bonus,
        Some(raw) => TransactionType::parse(&raw.to_ascii_uppercase())?,
    };

    let update = state
        .ledger
        .credit(
            &req.user_id,
            req.amount,
            transaction_type,
            req.reason,
            serde_json::json!({ "admin_id": admin.admin_id }),
        )
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %req.user_id,
        amount = req.amount,
        "Admin granted credits"
    );

    Ok(Json(GrantCreditsResponse {
        transaction_id: update.transaction.id.to_string(),
        balance: update.user.credits,
    }))
}

/// Plan upsert request.
#[derive(Debug, Deserialize)]
pub struct PutPlanRequest {
    /// Display name.
    pub name: String,
    /// Credits per billing interval.
    pub credits: i64,
    /// Price in minor units.
    pub amount_minor: i64,
    /// `monthly` or `annually`.
    pub interval: String,
}

/// Create or replace a plan.
pub async fn put_plan(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(code): Path<String>,
    Json(req): Json<PutPlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    if req.credits < 0 || req.amount_minor < 0 {
        return Err(ApiError::BadRequest(
            "credits and amount must not be negative".into(),
        ));
    }

    let plan = Plan {
        code,
        name: req.name,
        credits: req.credits,
        amount_minor: req.amount_minor,
        interval: BillingInterval::parse(&req.interval)?,
    };
    state.store.put_plan(&plan).await?;

    tracing::info!(admin_id = %admin.admin_id, plan_code = %plan.code, "Plan saved");

    Ok(Json(plan))
}
