//! Paystack API types.

use serde::{Deserialize, Serialize};

/// Envelope every Paystack response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct PaystackResponse<T> {
    /// Whether the call succeeded.
    pub status: bool,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Payload.
    pub data: Option<T>,
}

/// Request body for `POST /transaction/initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeTransaction<'a> {
    /// Customer email.
    pub email: &'a str,
    /// Amount in minor units (kobo, pesewas, cents).
    pub amount: i64,
    /// ISO currency code.
    pub currency: &'a str,
    /// Arbitrary metadata echoed back on verify and webhooks.
    pub metadata: serde_json::Value,
    /// Where the customer returns after checkout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<&'a str>,
}

/// `data` of a successful initialize call.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializedTransaction {
    /// Hosted checkout URL.
    pub authorization_url: String,
    /// Access code for inline checkout.
    #[serde(default)]
    pub access_code: Option<String>,
    /// Transaction reference.
    pub reference: String,
}

/// The fields of a verified transaction the service acts on.
///
/// The full `data` object is kept alongside as the provider snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedTransaction {
    /// Provider status (`success`, `failed`, `abandoned`, ...).
    pub status: String,
    /// Transaction reference.
    pub reference: String,
    /// Amount actually charged, minor units.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Request body for `POST /subscription/disable`.
#[derive(Debug, Clone, Serialize)]
pub struct DisableSubscription<'a> {
    /// Subscription code.
    pub code: &'a str,
    /// Email token for the subscription.
    pub token: &'a str,
}

/// A webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event name, e.g. `charge.success`.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Customer block embedded in charge and subscription events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
}

/// Plan block embedded in subscription events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPlan {
    /// Plan code.
    #[serde(default)]
    pub plan_code: Option<String>,
}

/// `data` of a `subscription.*` event.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionEvent {
    /// Provider subscription code.
    pub subscription_code: String,
    /// Token needed to disable the subscription.
    #[serde(default)]
    pub email_token: Option<String>,
    /// Subscribed plan.
    #[serde(default)]
    pub plan: EventPlan,
    /// Subscriber.
    #[serde(default)]
    pub customer: Customer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_response_parses() {
        let body = serde_json::json!({
            "status": true,
            "message": "Verification successful",
            "data": {"status": "success", "reference": "ref_1", "amount": 50000, "currency": "NGN"}
        });
        let response: PaystackResponse<VerifiedTransaction> = serde_json::from_value(body).unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.status, "success");
        assert_eq!(data.amount, Some(50000));
    }

    #[test]
    fn subscription_event_parses() {
        let data = serde_json::json!({
            "subscription_code": "SUB_x",
            "email_token": "tok",
            "plan": {"plan_code": "PLN_pro", "name": "Pro"},
            "customer": {"email": "a@example.com"}
        });
        let event: SubscriptionEvent = serde_json::from_value(data).unwrap();
        assert_eq!(event.plan.plan_code.as_deref(), Some("PLN_pro"));
        assert_eq!(event.customer.email.as_deref(), Some("a@example.com"));
    }
}
