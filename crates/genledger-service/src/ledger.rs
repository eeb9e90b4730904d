//! Credit ledger operations.
//!
//! Every balance change goes through `Store::apply_ledger_entry`, which checks
//! sufficiency, updates the balance and appends the transaction row in one
//! atomic unit. This module adds input validation and the user-facing
//! shapes on top.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use genledger_core::{CreditTransaction, TransactionId, TransactionType, User, UserId};
use genledger_store::{LedgerUpdate, Store};

use crate::error::ApiError;

/// Result of a successful deduction.
#[derive(Debug, Clone, Serialize)]
pub struct Deduction {
    /// Balance after the deduction.
    pub remaining: i64,
    /// Lifetime credits used after the deduction.
    pub used: i64,
    /// Credits deducted.
    pub deducted: i64,
    /// The appended USAGE row.
    pub transaction_id: TransactionId,
}

/// A user's balance.
#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    /// Credits available to spend.
    pub available: i64,
    /// Lifetime credits used.
    pub used: i64,
    /// `available + used`.
    pub total: i64,
    /// Last balance change.
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for Balance {
    fn from(user: &User) -> Self {
        Self {
            available: user.credits,
            used: user.total_credits_used,
            total: user.credits.saturating_add(user.total_credits_used),
            updated_at: user.credits_updated_at,
        }
    }
}

/// The credit ledger.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
    signup_credits: i64,
}

impl CreditLedger {
    /// Create a ledger over `store`, granting `signup_credits` to new users.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, signup_credits: i64) -> Self {
        Self {
            store,
            signup_credits,
        }
    }

    /// Fetch the user for an identity subject, creating it on first sight.
    ///
    /// Concurrent first requests for one subject resolve to the same user.
    pub async fn ensure_user(&self, external_id: &str) -> Result<User, ApiError> {
        if let Some(user) = self.store.get_user_by_external_id(external_id).await? {
            return Ok(user);
        }

        let user = self
            .store
            .insert_user(&User::new(external_id, self.signup_credits))
            .await?;
        tracing::info!(
            user_id = %user.id,
            external_id = %external_id,
            credits = user.credits,
            "User created"
        );
        Ok(user)
    }

    /// Remove `amount` credits.
    ///
    /// Fails with `InsufficientCredits` when the balance is short; nothing
    /// changes in that case.
    pub async fn deduct(
        &self,
        user_id: &UserId,
        amount: i64,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<Deduction, ApiError> {
        ensure_positive(amount)?;

        let entry = CreditTransaction::usage(*user_id, amount, description, metadata);
        let LedgerUpdate { user, transaction } = self.store.apply_ledger_entry(&entry).await?;

        tracing::debug!(
            user_id = %user_id,
            amount = amount,
            remaining = user.credits,
            transaction_id = %transaction.id,
            "Credits deducted"
        );

        Ok(Deduction {
            remaining: user.credits,
            used: user.total_credits_used,
            deducted: amount,
            transaction_id: transaction.id,
        })
    }

    /// Add `amount` credits as a PURCHASE, REFUND or BONUS.
    pub async fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<LedgerUpdate, ApiError> {
        ensure_positive(amount)?;
        if !transaction_type.is_credit() {
            return Err(ApiError::BadRequest(format!(
                "{} cannot add credits",
                transaction_type.as_str()
            )));
        }

        let entry =
            CreditTransaction::credit(*user_id, amount, transaction_type, description, metadata);
        let update = self.store.apply_ledger_entry(&entry).await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            transaction_type = transaction_type.as_str(),
            balance = update.user.credits,
            "Credits added"
        );

        Ok(update)
    }

    /// Read a user's balance.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<Balance, ApiError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user not found: {user_id}")))?;
        Ok(Balance::from(&user))
    }

    /// A page of the user's transactions, newest first.
    pub async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>, ApiError> {
        Ok(self
            .store
            .list_transactions_by_user(user_id, limit, offset)
            .await?)
    }
}

fn ensure_positive(amount: i64) -> Result<(), ApiError> {
    if amount <= 0 {
        return Err(ApiError::BadRequest(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}
