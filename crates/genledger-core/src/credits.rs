//! Credit transaction types for genledger.
//!
//! Every change to a user's balance appends one immutable transaction row.
//! The rows are never updated or deleted, so a user's history reconciles
//! against their current balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::{TransactionId, UserId};

/// A credit transaction representing a balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Signed amount. Positive = credit, Negative = debit.
    pub amount: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Balance after this transaction. Filled in by the store when the
    /// change is applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata (`job_id`, payment reference, ...).
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create a usage transaction (deduction). The amount is stored negative.
    #[must_use]
    pub fn usage(
        user_id: UserId,
        amount: i64,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self::new(
            user_id,
            -amount.abs(),
            TransactionType::Usage,
            description.into(),
            metadata,
        )
    }

    /// Create a crediting transaction of the given type. The amount is stored positive.
    #[must_use]
    pub fn credit(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self::new(
            user_id,
            amount.abs(),
            transaction_type,
            description.into(),
            metadata,
        )
    }

    /// Create a purchase transaction for a settled payment.
    #[must_use]
    pub fn purchase(user_id: UserId, amount: i64, reference: &str) -> Self {
        Self::credit(
            user_id,
            amount,
            TransactionType::Purchase,
            format!("Purchased {amount} credits (reference: {reference})"),
            serde_json::json!({ "reference": reference }),
        )
    }

    /// Create a refund transaction.
    #[must_use]
    pub fn refund(user_id: UserId, amount: i64, reason: impl Into<String>) -> Self {
        Self::credit(
            user_id,
            amount,
            TransactionType::Refund,
            reason,
            serde_json::Value::Null,
        )
    }

    fn new(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            transaction_type,
            balance_after: 0,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this transaction removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        self.amount < 0
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Credits deducted for a generation.
    Usage,

    /// User purchased credits.
    Purchase,

    /// Credits returned to the user.
    Refund,

    /// Promotional/bonus credits.
    Bonus,
}

impl TransactionType {
    /// Persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "USAGE",
            Self::Purchase => "PURCHASE",
            Self::Refund => "REFUND",
            Self::Bonus => "BONUS",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "USAGE" => Ok(Self::Usage),
            "PURCHASE" => Ok(Self::Purchase),
            "REFUND" => Ok(Self::Refund),
            "BONUS" => Ok(Self::Bonus),
            other => Err(CoreError::UnknownVariant {
                kind: "transaction type",
                value: other.to_string(),
            }),
        }
    }

    /// Check if this transaction type adds credits.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(self, Self::Purchase | Self::Refund | Self::Bonus)
    }
}
