//! Payment reconciliation.
//!
//! A checkout is recorded PENDING before the customer is sent to Paystack.
//! It settles exactly once, from whichever arrives first: the customer's
//! verify call or the `charge.*` webhook. Settlement and the PURCHASE credit
//! are one store-atomic unit.

use serde::Serialize;
use serde_json::json;

use genledger_core::{
    CreditTransaction, Payment, PaymentStatus, Subscription, SubscriptionId, User,
};
use genledger_store::{PaymentSettlement, StoreError};

use crate::error::ApiError;
use crate::idempotency::payment_key;
use crate::paystack::{
    InitializeTransaction, PaystackClient, SubscriptionEvent, VerifiedTransaction, WebhookEvent,
};
use crate::state::AppState;

/// A started checkout.
#[derive(Debug, Clone, Serialize)]
pub struct Checkout {
    /// Hosted checkout URL.
    pub authorization_url: String,
    /// Payment reference.
    pub reference: String,
    /// Credits granted on success.
    pub credits: i64,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency code.
    pub currency: String,
}

/// Result of a settlement attempt.
#[derive(Debug, Clone)]
pub struct Settled {
    /// The payment as stored afterwards.
    pub payment: Payment,
    /// Whether this attempt changed it.
    pub applied: bool,
}

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State changed.
    Processed,
    /// Already handled earlier.
    Duplicate,
    /// Nothing to do (unknown event, reference or customer).
    Ignored,
}

fn paystack(state: &AppState) -> Result<&PaystackClient, ApiError> {
    state
        .paystack
        .as_deref()
        .ok_or_else(|| ApiError::UpstreamUnavailable {
            message: "payments not configured".into(),
            details: None,
        })
}

// ============================================================================
// Checkout
// ============================================================================

/// Start a checkout for `amount` minor units.
pub async fn initialize(
    state: &AppState,
    user: &User,
    amount: i64,
    email: &str,
    metadata: serde_json::Value,
) -> Result<Checkout, ApiError> {
    let paystack = paystack(state)?;

    let price = state.config.credit_price_minor;
    if amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    let credits = amount / price;
    if credits == 0 {
        return Err(ApiError::BadRequest(format!(
            "amount is below the price of one credit ({price})"
        )));
    }

    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".into()));
    }

    let currency = state.config.currency.as_str();
    let request = InitializeTransaction {
        email,
        amount,
        currency,
        metadata: json!({
            "user_id": user.id,
            "credits": credits,
            "custom": metadata,
        }),
        callback_url: None,
    };
    let data = paystack.initialize_transaction(&request).await?;

    let payment = Payment::new(
        data.reference.clone(),
        user.id,
        email,
        amount,
        currency,
        credits,
    );
    state.store.insert_payment(&payment).await?;
    state.store.set_user_email(&user.id, email).await?;

    tracing::info!(
        user_id = %user.id,
        reference = %payment.reference,
        amount = amount,
        credits = credits,
        "Checkout initialized"
    );

    Ok(Checkout {
        authorization_url: data.authorization_url,
        reference: payment.reference,
        credits,
        amount,
        currency: payment.currency,
    })
}

/// Confirm a payment with the provider and settle it.
///
/// A payment that is already settled is returned as stored, without calling
/// the provider.
pub async fn verify(state: &AppState, user: &User, reference: &str) -> Result<Payment, ApiError> {
    let payment = state
        .store
        .get_payment(reference)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("payment not found: {reference}")))?;

    if payment.user_id != user.id {
        return Err(ApiError::Forbidden);
    }
    if payment.is_terminal() {
        return Ok(payment);
    }

    let (transaction, raw) = paystack(state)?.verify_transaction(reference).await?;
    let status = resolve_status(&payment, &transaction);
    Ok(settle(state, &payment, status, &raw).await?.payment)
}

/// Map the provider's answer, refusing to grant on an underpayment.
fn resolve_status(payment: &Payment, transaction: &VerifiedTransaction) -> PaymentStatus {
    let status = PaymentStatus::from_provider(&transaction.status);
    if status == PaymentStatus::Success
        && transaction
            .amount
            .is_some_and(|paid| paid < payment.amount_minor)
    {
        tracing::warn!(
            reference = %payment.reference,
            expected = payment.amount_minor,
            paid = ?transaction.amount,
            "Charged amount below checkout amount"
        );
        return PaymentStatus::Failed;
    }
    status
}

/// Move `payment` to `status`, granting its credits on SUCCESS.
///
/// PENDING only refreshes the provider snapshot. Terminal settlement is
/// guarded by `payment:{reference}` and by the store's terminal check.
pub async fn settle(
    state: &AppState,
    payment: &Payment,
    status: PaymentStatus,
    provider_data: &serde_json::Value,
) -> Result<Settled, ApiError> {
    if status == PaymentStatus::Pending {
        let settlement = state
            .store
            .settle_payment(&payment.reference, status, provider_data, None)
            .await?;
        return Ok(Settled {
            payment: settlement.payment().clone(),
            applied: false,
        });
    }

    let key = payment_key(&payment.reference);
    if !state.guard.admit(&key).await? {
        let current = state
            .store
            .get_payment(&payment.reference)
            .await?
            .unwrap_or_else(|| payment.clone());
        return Ok(Settled {
            payment: current,
            applied: false,
        });
    }

    let grant = (status == PaymentStatus::Success && payment.credits > 0).then(|| {
        CreditTransaction::purchase(payment.user_id, payment.credits, &payment.reference)
    });

    match state
        .store
        .settle_payment(&payment.reference, status, provider_data, grant.as_ref())
        .await
    {
        Ok(PaymentSettlement::Settled { payment, ledger }) => {
            tracing::info!(
                reference = %payment.reference,
                status = payment.status.as_str(),
                credits = ledger.as_ref().map_or(0, |l| l.transaction.amount),
                balance = ?ledger.as_ref().map(|l| l.user.credits),
                "Payment settled"
            );
            Ok(Settled {
                payment,
                applied: true,
            })
        }
        Ok(PaymentSettlement::AlreadySettled(payment)) => Ok(Settled {
            payment,
            applied: false,
        }),
        Err(e) => {
            state.guard.release(&key).await;
            Err(e.into())
        }
    }
}

// ============================================================================
// Webhooks
// ============================================================================

/// Apply a verified Paystack webhook event.
pub async fn handle_webhook(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<WebhookOutcome, ApiError> {
    match event.event.as_str() {
        "charge.success" | "charge.failed" => charge_event(state, &event.data).await,
        "subscription.create" => subscription_created(state, &event.data).await,
        "subscription.disable" | "subscription.not_renew" => {
            subscription_ended(state, &event.data).await
        }
        other => {
            tracing::info!(event = %other, "Unhandled Paystack event");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

async fn charge_event(
    state: &AppState,
    data: &serde_json::Value,
) -> Result<WebhookOutcome, ApiError> {
    let transaction: VerifiedTransaction = serde_json::from_value(data.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid charge payload: {e}")))?;

    let Some(payment) = state.store.get_payment(&transaction.reference).await? else {
        tracing::warn!(reference = %transaction.reference, "Charge for unknown payment reference");
        return Ok(WebhookOutcome::Ignored);
    };
    if payment.is_terminal() {
        return Ok(WebhookOutcome::Duplicate);
    }

    let status = resolve_status(&payment, &transaction);
    let settled = settle(state, &payment, status, data).await?;

    Ok(if settled.applied || status == PaymentStatus::Pending {
        WebhookOutcome::Processed
    } else {
        WebhookOutcome::Duplicate
    })
}

async fn subscription_created(
    state: &AppState,
    data: &serde_json::Value,
) -> Result<WebhookOutcome, ApiError> {
    let event: SubscriptionEvent = serde_json::from_value(data.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid subscription payload: {e}")))?;

    if state
        .store
        .get_subscription_by_provider_code(&event.subscription_code)
        .await?
        .is_some()
    {
        return Ok(WebhookOutcome::Duplicate);
    }

    let Some(plan_code) = event.plan.plan_code else {
        tracing::warn!(code = %event.subscription_code, "Subscription event without a plan");
        return Ok(WebhookOutcome::Ignored);
    };
    let user = match event.customer.email.as_deref() {
        Some(email) => state.store.get_user_by_email(email).await?,
        None => None,
    };
    let Some(user) = user else {
        tracing::warn!(code = %event.subscription_code, "Subscription for unknown customer");
        return Ok(WebhookOutcome::Ignored);
    };

    if state.store.get_plan(&plan_code).await?.is_none() {
        tracing::warn!(plan_code = %plan_code, "Subscription to a plan not configured locally");
    }

    let mut subscription = Subscription::new(user.id, plan_code);
    subscription.provider_code = Some(event.subscription_code);
    subscription.email_token = event.email_token;

    match state.store.insert_subscription(&subscription).await {
        Ok(()) => {
            tracing::info!(
                user_id = %user.id,
                subscription_id = %subscription.id,
                plan_code = %subscription.plan_code,
                "Subscription activated"
            );
            Ok(WebhookOutcome::Processed)
        }
        Err(StoreError::Duplicate { .. }) => Ok(WebhookOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

async fn subscription_ended(
    state: &AppState,
    data: &serde_json::Value,
) -> Result<WebhookOutcome, ApiError> {
    let code = data
        .get("subscription_code")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing subscription_code".into()))?;

    let Some(subscription) = state.store.get_subscription_by_provider_code(code).await? else {
        tracing::warn!(code = %code, "Cancellation for unknown subscription");
        return Ok(WebhookOutcome::Ignored);
    };
    if !subscription.is_active() {
        return Ok(WebhookOutcome::Duplicate);
    }

    state.store.cancel_subscription(&subscription.id).await?;
    tracing::info!(subscription_id = %subscription.id, "Subscription cancelled by provider");
    Ok(WebhookOutcome::Processed)
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Cancel one of `user`'s subscriptions.
///
/// The provider is told first; the local record changes only after it
/// confirms.
pub async fn cancel_subscription(
    state: &AppState,
    user: &User,
    id: &SubscriptionId,
) -> Result<Subscription, ApiError> {
    let subscription = state
        .store
        .get_subscription(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("subscription not found: {id}")))?;

    if subscription.user_id != user.id {
        return Err(ApiError::Forbidden);
    }
    if !subscription.is_active() {
        return Ok(subscription);
    }

    match (&subscription.provider_code, &subscription.email_token) {
        (Some(code), Some(token)) => {
            paystack(state)?.disable_subscription(code, token).await?;
        }
        _ => {
            tracing::warn!(subscription_id = %id, "No provider subscription on record, cancelling locally");
        }
    }

    let cancelled = state.store.cancel_subscription(id).await?;
    tracing::info!(user_id = %user.id, subscription_id = %id, "Subscription cancelled");
    Ok(cancelled)
}
