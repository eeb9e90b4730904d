//! User, plan and subscription types for genledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::{SubscriptionId, UserId};

/// Credits granted to a user when their record is first created.
pub const DEFAULT_SIGNUP_CREDITS: i64 = 100;

/// A local user correlated 1:1 with an identity-provider subject.
///
/// The balance fields are only ever mutated through the credit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Local user ID.
    pub id: UserId,

    /// Identity-provider subject (unique).
    pub external_id: String,

    /// Email recorded at checkout, if any.
    pub email: Option<String>,

    /// When `email` was last recorded.
    pub email_updated_at: Option<DateTime<Utc>>,

    /// Current credit balance. Never negative.
    pub credits: i64,

    /// Lifetime credits consumed. Never decreases.
    pub total_credits_used: i64,

    /// When the balance last changed.
    pub credits_updated_at: DateTime<Utc>,

    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user holding the signup grant.
    #[must_use]
    pub fn new(external_id: impl Into<String>, signup_credits: i64) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::generate(),
            external_id: external_id.into(),
            email: None,
            email_updated_at: None,
            credits: signup_credits.max(0),
            total_credits_used: 0,
            credits_updated_at: now,
            created_at: now,
        }
    }

    /// Check if the user can afford a deduction.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credits >= amount
    }
}

/// Billing interval of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    /// Billed every month.
    Monthly,
    /// Billed every year.
    Annually,
}

impl BillingInterval {
    /// Stable string form used in storage and provider payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annually => "annually",
        }
    }

    /// Parse the stable string form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "monthly" => Ok(Self::Monthly),
            "annually" => Ok(Self::Annually),
            other => Err(CoreError::UnknownVariant {
                kind: "billing interval",
                value: other.to_string(),
            }),
        }
    }
}

/// A purchasable plan granting credits per billing interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Provider plan code (e.g. `PLN_xxx`).
    pub code: String,

    /// Display name.
    pub name: String,

    /// Credits granted per interval.
    pub credits: i64,

    /// Price per interval in minor currency units.
    pub amount_minor: i64,

    /// Billing interval.
    pub interval: BillingInterval,
}

/// A user's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Local subscription ID.
    pub id: SubscriptionId,

    /// Subscribed user.
    pub user_id: UserId,

    /// Plan code.
    pub plan_code: String,

    /// Provider subscription code (`SUB_xxx`), needed for cancellation.
    pub provider_code: Option<String>,

    /// Provider email token, needed for cancellation.
    pub email_token: Option<String>,

    /// Current status.
    pub status: SubscriptionStatus,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,

    /// When the subscription was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create a new active subscription.
    #[must_use]
    pub fn new(user_id: UserId, plan_code: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_code: plan_code.into(),
            provider_code: None,
            email_token: None,
            status: SubscriptionStatus::Active,
            created_at: Utc::now(),
            cancelled_at: None,
        }
    }

    /// Check if the subscription is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Subscription is active.
    Active,

    /// Subscription was cancelled with the provider.
    Cancelled,
}

impl SubscriptionStatus {
    /// Persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(CoreError::UnknownVariant {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_holds_signup_grant() {
        let user = User::new("user_2abc", 100);
        assert_eq!(user.credits, 100);
        assert_eq!(user.total_credits_used, 0);
        assert!(user.email.is_none());
    }

    #[test]
    fn negative_signup_grant_is_floored() {
        let user = User::new("user_2abc", -5);
        assert_eq!(user.credits, 0);
    }

    #[test]
    fn user_sufficient_credits() {
        let user = User::new("user_2abc", 500);
        assert!(user.has_sufficient_credits(500));
        assert!(!user.has_sufficient_credits(501));
    }

    #[test]
    fn subscription_status_parse() {
        assert_eq!(
            SubscriptionStatus::parse("CANCELLED").unwrap(),
            SubscriptionStatus::Cancelled
        );
        assert!(SubscriptionStatus::parse("cancelled").is_err());
    }
}
