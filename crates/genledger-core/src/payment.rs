//! Payment records for provider-hosted checkouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::PaymentStatus;
use crate::UserId;

/// A payment opened with the provider.
///
/// Created PENDING at checkout initialization and settled at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Provider-issued reference (unique).
    pub reference: String,

    /// Paying user.
    pub user_id: UserId,

    /// Email sent to the provider.
    pub email: String,

    /// Amount in minor currency units.
    pub amount_minor: i64,

    /// ISO currency code.
    pub currency: String,

    /// Credits granted when the payment succeeds.
    pub credits: i64,

    /// Current status.
    pub status: PaymentStatus,

    /// Snapshot of the last provider response.
    pub provider_data: serde_json::Value,

    /// When the checkout was opened.
    pub created_at: DateTime<Utc>,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Create a new PENDING payment.
    #[must_use]
    pub fn new(
        reference: impl Into<String>,
        user_id: UserId,
        email: impl Into<String>,
        amount_minor: i64,
        currency: impl Into<String>,
        credits: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference: reference.into(),
            user_id,
            email: email.into(),
            amount_minor,
            currency: currency.into(),
            credits,
            status: PaymentStatus::Pending,
            provider_data: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the payment is settled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
