//! Record mutations shared by every backend.
//!
//! Backends load the locked row, run one of these functions against it and
//! write the result back inside the same transaction.

use chrono::{DateTime, Utc};

use genledger_core::{CreditTransaction, Job, JobStatus, TransactionType, User};

use crate::error::{Result, StoreError};
use crate::JobProgress;

/// Apply a signed entry to `user`, returning the entry with `balance_after` set.
pub(crate) fn apply_entry(
    user: &mut User,
    transaction: &CreditTransaction,
    now: DateTime<Utc>,
) -> Result<CreditTransaction> {
    if transaction.is_debit() {
        let required = transaction.amount.saturating_neg();
        if !user.has_sufficient_credits(required) {
            return Err(StoreError::InsufficientCredits {
                available: user.credits,
                required,
            });
        }
    }

    user.credits = user
        .credits
        .checked_add(transaction.amount)
        .ok_or_else(|| StoreError::Database("credit balance overflow".into()))?;
    if transaction.transaction_type == TransactionType::Usage {
        user.total_credits_used = user
            .total_credits_used
            .saturating_add(transaction.amount.saturating_abs());
    }
    user.credits_updated_at = now;

    let mut applied = transaction.clone();
    applied.user_id = user.id;
    applied.balance_after = user.credits;
    Ok(applied)
}

/// Apply a progress report. Returns `false` when the job is terminal.
pub(crate) fn apply_progress(job: &mut Job, update: &JobProgress, now: DateTime<Utc>) -> bool {
    let Some(next) = job.status.advance(update.status) else {
        return false;
    };

    job.status = next;
    if let Some(progress) = update.progress {
        job.progress = progress.min(100);
    }
    if update.message.is_some() {
        job.message.clone_from(&update.message);
    }
    if next != JobStatus::Pending && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    if next.is_terminal() {
        job.completed_at = Some(now);
    }
    if next == JobStatus::Completed {
        job.progress = 100;
    }
    true
}

/// Mark a job COMPLETED. Returns `false` when the job is terminal.
pub(crate) fn apply_completion(job: &mut Job, message: Option<&str>, now: DateTime<Utc>) -> bool {
    if job.is_terminal() {
        return false;
    }
    job.status = JobStatus::Completed;
    job.progress = 100;
    if let Some(message) = message {
        job.message = Some(message.to_string());
    }
    job.started_at.get_or_insert(now);
    job.completed_at = Some(now);
    true
}

/// Mark a job FAILED. Returns `false` when the job is terminal.
pub(crate) fn apply_failure(job: &mut Job, error: &str, now: DateTime<Utc>) -> bool {
    if job.is_terminal() {
        return false;
    }
    job.status = JobStatus::Failed;
    job.error = Some(error.to_string());
    job.completed_at = Some(now);
    true
}
