//! Subscription handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use genledger_core::{Subscription, SubscriptionId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::payments;
use crate::state::AppState;

/// Subscription response.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Subscription ID.
    pub id: String,
    /// Plan code.
    pub plan_code: String,
    /// Plan name, when the plan is configured.
    pub plan_name: Option<String>,
    /// Credits per interval, when the plan is configured.
    pub credits_per_interval: Option<i64>,
    /// Billing interval, when the plan is configured.
    pub interval: Option<&'static str>,
    /// `ACTIVE` or `CANCELLED`.
    pub status: &'static str,
    /// Created.
    pub created_at: String,
    /// Cancelled.
    pub cancelled_at: Option<String>,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: subscription.id.to_string(),
            plan_code: subscription.plan_code.clone(),
            plan_name: None,
            credits_per_interval: None,
            interval: None,
            status: subscription.status.as_str(),
            created_at: subscription.created_at.to_rfc3339(),
            cancelled_at: subscription.cancelled_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Current subscription response.
#[derive(Debug, Serialize)]
pub struct MySubscriptionResponse {
    /// The active subscription, if any.
    pub subscription: Option<SubscriptionResponse>,
}

/// The caller's active subscription and its plan.
pub async fn my_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<MySubscriptionResponse>, ApiError> {
    let Some(subscription) = state.store.active_subscription(&auth.user.id).await? else {
        return Ok(Json(MySubscriptionResponse { subscription: None }));
    };

    let mut response = SubscriptionResponse::from(&subscription);
    if let Some(plan) = state.store.get_plan(&subscription.plan_code).await? {
        response.plan_name = Some(plan.name);
        response.credits_per_interval = Some(plan.credits);
        response.interval = Some(plan.interval.as_str());
    }

    Ok(Json(MySubscriptionResponse {
        subscription: Some(response),
    }))
}

/// Cancel one of the caller's subscriptions.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<SubscriptionId>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = payments::cancel_subscription(&state, &auth.user, &id).await?;
    Ok(Json(SubscriptionResponse::from(&subscription)))
}
