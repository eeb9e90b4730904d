//! Storage layer for genledger.
//!
//! This crate provides persistence for users, the credit ledger, generation
//! jobs and their files, payments, plans, subscriptions and the processed
//! callback table backing webhook idempotency.
//!
//! # Backends
//!
//! - `PgStore`: PostgreSQL via `sqlx`, with embedded migrations. Balance and
//!   status changes run inside a transaction holding a `FOR UPDATE` row lock.
//! - `MemoryStore`: a single-process store serialized under one lock, used
//!   when no database is configured and in tests.
//!
//! # Atomic units
//!
//! Every operation that touches more than one record is one atomic unit in
//! both backends:
//!
//! - `apply_ledger_entry`: balance check, balance update, usage counter and
//!   the appended transaction row.
//! - `complete_job`: terminal check, the generated file rows and the
//!   COMPLETED transition.
//! - `settle_payment`: terminal check, the status transition and the
//!   purchase credit.
//!
//! # Example
//!
//! ```no_run
//! use genledger_core::User;
//! use genledger_store::{MemoryStore, Store};
//!
//! # async fn example() -> genledger_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = store.insert_user(&User::new("user_2abc", 100)).await?;
//! let fetched = store.get_user(&user.id).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
mod transition;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use genledger_core::{
    CreditTransaction, FileId, GeneratedFile, Job, JobId, JobStatus, Payment, PaymentStatus, Plan,
    Subscription, SubscriptionId, User, UserId,
};

/// Result of applying a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    /// The user after the change.
    pub user: User,
    /// The appended transaction, with `balance_after` filled in.
    pub transaction: CreditTransaction,
}

/// A non-terminal progress report for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    /// Status reported by the worker, already mapped.
    pub status: JobStatus,
    /// Progress percentage, clamped to 0-100 by the store.
    pub progress: Option<u8>,
    /// Worker message.
    pub message: Option<String>,
}

/// Outcome of a job status write.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    /// The write was applied; holds the updated job.
    Applied(Job),
    /// The job was already terminal; nothing changed.
    AlreadyTerminal(Job),
}

impl JobTransition {
    /// The job as stored after the call.
    #[must_use]
    pub fn job(&self) -> &Job {
        match self {
            Self::Applied(job) | Self::AlreadyTerminal(job) => job,
        }
    }

    /// Whether this call changed the job.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Outcome of settling a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentSettlement {
    /// This call recorded the status; `ledger` holds the purchase credit if
    /// one was applied.
    Settled {
        /// The payment after the change.
        payment: Payment,
        /// The credit applied for a successful payment.
        ledger: Option<LedgerUpdate>,
    },
    /// The payment was already terminal; nothing changed.
    AlreadySettled(Payment),
}

impl PaymentSettlement {
    /// The payment as stored after the call.
    #[must_use]
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Settled { payment, .. } | Self::AlreadySettled(payment) => payment,
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, in-memory for tests and local runs).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // User Operations
    // =========================================================================

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Get a user by identity-provider subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>>;

    /// Get the user who most recently recorded `email`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert a user unless one with the same `external_id` exists.
    ///
    /// Returns the stored user, which is the pre-existing one when two
    /// first requests race.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_user(&self, user: &User) -> Result<User>;

    /// Record the user's email.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn set_user_email(&self, id: &UserId, email: &str) -> Result<()>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Apply a signed ledger entry to the user's balance and append it.
    ///
    /// Debits are rejected when the balance is too low; USAGE entries also
    /// increment `total_credits_used`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user doesn't exist.
    /// - `StoreError::InsufficientCredits` if the balance is too low.
    async fn apply_ledger_entry(&self, transaction: &CreditTransaction) -> Result<LedgerUpdate>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Insert a new job.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the id is taken.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// List a user's jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_jobs_by_author(
        &self,
        author_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>>;

    /// Apply a progress report unless the job is terminal.
    ///
    /// Non-terminal regressions keep the current status. The first move
    /// past PENDING stamps `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job doesn't exist.
    async fn update_job_progress(&self, id: &JobId, update: &JobProgress) -> Result<JobTransition>;

    /// Mark a job COMPLETED and record its files, unless it is terminal.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job doesn't exist.
    async fn complete_job(
        &self,
        id: &JobId,
        files: &[GeneratedFile],
        message: Option<&str>,
    ) -> Result<JobTransition>;

    /// Mark a job FAILED unless it is terminal.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job doesn't exist.
    async fn fail_job(&self, id: &JobId, error: &str) -> Result<JobTransition>;

    // =========================================================================
    // File Operations
    // =========================================================================

    /// List the files a job produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_files_by_job(&self, job_id: &JobId) -> Result<Vec<GeneratedFile>>;

    /// Get a file record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_file(&self, id: &FileId) -> Result<Option<GeneratedFile>>;

    /// Delete a file record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the file doesn't exist.
    async fn delete_file(&self, id: &FileId) -> Result<()>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Insert a new payment.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the reference is taken.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Get a payment by reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>>;

    /// List a user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Payment>>;

    /// Record the provider's verdict on a PENDING payment.
    ///
    /// `Pending` only refreshes `provider_data`. `Success` also applies
    /// `grant`, in the same unit. A terminal payment is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the payment or its user doesn't exist.
    async fn settle_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        provider_data: &serde_json::Value,
        grant: Option<&CreditTransaction>,
    ) -> Result<PaymentSettlement>;

    // =========================================================================
    // Plan & Subscription Operations
    // =========================================================================

    /// Insert or update a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_plan(&self, plan: &Plan) -> Result<()>;

    /// Get a plan by code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_plan(&self, code: &str) -> Result<Option<Plan>>;

    /// Insert a subscription.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the provider code is taken.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;

    /// Get a subscription by provider code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription_by_provider_code(&self, code: &str)
        -> Result<Option<Subscription>>;

    /// The user's most recent ACTIVE subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Mark a subscription CANCELLED. Cancelling twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the subscription doesn't exist.
    async fn cancel_subscription(&self, id: &SubscriptionId) -> Result<Subscription>;

    // =========================================================================
    // Callback Idempotency
    // =========================================================================

    /// Claim a callback key until `expires_at`.
    ///
    /// Returns `true` if the key was absent or its previous claim had
    /// expired, `false` if an unexpired claim exists. Insert-if-absent is a
    /// single atomic step.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn claim_callback(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Drop a claim.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn release_callback(&self, key: &str) -> Result<()>;

    /// Delete claims that expired before `now`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn purge_expired_callbacks(&self, now: DateTime<Utc>) -> Result<u64>;
}
