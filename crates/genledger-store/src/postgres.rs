//! PostgreSQL storage implementation.
//!
//! Multi-record operations run in one transaction. Rows whose state is
//! checked before writing are loaded with `SELECT ... FOR UPDATE`, so two
//! concurrent deductions for the same user queue on the row lock instead of
//! both passing the balance check.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | `StoreError` |
//! |------------|-----------------|--------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any | `Database` |
//! | column decode | n/a | `Serialization` |
//! | anything else | n/a | `Database` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, instrument};

use genledger_core::{
    BillingInterval, CreditTransaction, FileId, GeneratedFile, Job, JobId, JobKind, JobSpec,
    JobStatus, Payment, PaymentStatus, Plan, StorageKey, Subscription, SubscriptionId,
    SubscriptionStatus, TransactionId, TransactionType, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::transition;
use crate::{JobProgress, JobTransition, LedgerUpdate, PaymentSettlement, Store};

const SELECT_USER: &str = "SELECT id, external_id, email, email_updated_at, credits, \
     total_credits_used, credits_updated_at, created_at FROM users";

const SELECT_TRANSACTION: &str = "SELECT id, user_id, amount, transaction_type, balance_after, \
     description, metadata, created_at FROM credit_transactions";

const SELECT_JOB: &str = "SELECT id, author_id, kind, spec, cost, status, progress, message, \
     error, created_at, started_at, completed_at FROM jobs";

const SELECT_FILE: &str = "SELECT id, job_id, owner_id, storage_key, content_type, format, \
     width, height, size_bytes, created_at FROM generated_files";

const SELECT_PAYMENT: &str = "SELECT reference, user_id, email, amount_minor, currency, credits, \
     status, provider_data, created_at, updated_at FROM payments";

const SELECT_SUBSCRIPTION: &str = "SELECT id, user_id, plan_code, provider_code, email_token, \
     status, created_at, cancelled_at FROM subscriptions";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of up to `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migrate: {e}")))
    }
}

// =============================================================================
// Error & Row Helpers
// =============================================================================

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                StoreError::Duplicate {
                    key: format!("{operation}: {}", db_err.message()),
                }
            } else {
                StoreError::Database(format!("{operation}: {}", db_err.message()))
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{operation}: {err}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(col(row, "id")?),
        external_id: col(row, "external_id")?,
        email: col(row, "email")?,
        email_updated_at: col(row, "email_updated_at")?,
        credits: col(row, "credits")?,
        total_credits_used: col(row, "total_credits_used")?,
        credits_updated_at: col(row, "credits_updated_at")?,
        created_at: col(row, "created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = col(row, "id")?;
    let transaction_type: String = col(row, "transaction_type")?;
    Ok(CreditTransaction {
        id: id
            .parse::<TransactionId>()
            .map_err(genledger_core::CoreError::from)?,
        user_id: UserId::from_uuid(col(row, "user_id")?),
        amount: col(row, "amount")?,
        transaction_type: TransactionType::parse(&transaction_type)?,
        balance_after: col(row, "balance_after")?,
        description: col(row, "description")?,
        metadata: col(row, "metadata")?,
        created_at: col(row, "created_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let kind: String = col(row, "kind")?;
    let status: String = col(row, "status")?;
    let spec: Json<JobSpec> = col(row, "spec")?;
    let progress: i16 = col(row, "progress")?;
    Ok(Job {
        id: JobId::from_uuid(col(row, "id")?),
        author_id: UserId::from_uuid(col(row, "author_id")?),
        kind: JobKind::parse(&kind)?,
        spec: spec.0,
        cost: col(row, "cost")?,
        status: JobStatus::parse(&status)?,
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(0),
        message: col(row, "message")?,
        error: col(row, "error")?,
        created_at: col(row, "created_at")?,
        started_at: col(row, "started_at")?,
        completed_at: col(row, "completed_at")?,
    })
}

fn file_from_row(row: &PgRow) -> Result<GeneratedFile> {
    let storage_key: String = col(row, "storage_key")?;
    let width: Option<i32> = col(row, "width")?;
    let height: Option<i32> = col(row, "height")?;
    let size_bytes: Option<i64> = col(row, "size_bytes")?;
    Ok(GeneratedFile {
        id: FileId::from_uuid(col(row, "id")?),
        job_id: JobId::from_uuid(col(row, "job_id")?),
        owner_id: UserId::from_uuid(col(row, "owner_id")?),
        storage_key: storage_key.parse::<StorageKey>()?,
        content_type: col(row, "content_type")?,
        format: col(row, "format")?,
        width: width.and_then(|w| u32::try_from(w).ok()),
        height: height.and_then(|h| u32::try_from(h).ok()),
        size_bytes: size_bytes.and_then(|s| u64::try_from(s).ok()),
        created_at: col(row, "created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = col(row, "status")?;
    Ok(Payment {
        reference: col(row, "reference")?,
        user_id: UserId::from_uuid(col(row, "user_id")?),
        email: col(row, "email")?,
        amount_minor: col(row, "amount_minor")?,
        currency: col(row, "currency")?,
        credits: col(row, "credits")?,
        status: PaymentStatus::parse(&status)?,
        provider_data: col(row, "provider_data")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn plan_from_row(row: &PgRow) -> Result<Plan> {
    let interval: String = col(row, "interval")?;
    Ok(Plan {
        code: col(row, "code")?,
        name: col(row, "name")?,
        credits: col(row, "credits")?,
        amount_minor: col(row, "amount_minor")?,
        interval: BillingInterval::parse(&interval)?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let status: String = col(row, "status")?;
    Ok(Subscription {
        id: SubscriptionId::from_uuid(col(row, "id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        plan_code: col(row, "plan_code")?,
        provider_code: col(row, "provider_code")?,
        email_token: col(row, "email_token")?,
        status: SubscriptionStatus::parse(&status)?,
        created_at: col(row, "created_at")?,
        cancelled_at: col(row, "cancelled_at")?,
    })
}

// =============================================================================
// In-transaction Helpers
// =============================================================================

async fn apply_entry_in(
    conn: &mut PgConnection,
    entry: &CreditTransaction,
) -> Result<LedgerUpdate> {
    let sql = format!("{SELECT_USER} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(entry.user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_user", e))?
        .ok_or_else(|| StoreError::not_found("user", entry.user_id))?;

    let mut user = user_from_row(&row)?;
    let applied = transition::apply_entry(&mut user, entry, Utc::now())?;

    sqlx::query(
        "UPDATE users SET credits = $2, total_credits_used = $3, credits_updated_at = $4 \
         WHERE id = $1",
    )
    .bind(user.id.as_uuid())
    .bind(user.credits)
    .bind(user.total_credits_used)
    .bind(user.credits_updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_balance", e))?;

    sqlx::query(
        "INSERT INTO credit_transactions \
         (id, user_id, amount, transaction_type, balance_after, description, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(applied.id.to_string())
    .bind(applied.user_id.as_uuid())
    .bind(applied.amount)
    .bind(applied.transaction_type.as_str())
    .bind(applied.balance_after)
    .bind(&applied.description)
    .bind(&applied.metadata)
    .bind(applied.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_transaction", e))?;

    Ok(LedgerUpdate {
        user,
        transaction: applied,
    })
}

async fn lock_job(conn: &mut PgConnection, id: &JobId) -> Result<Job> {
    let sql = format!("{SELECT_JOB} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or_else(|| StoreError::not_found("job", id))?;
    job_from_row(&row)
}

async fn write_job_state(conn: &mut PgConnection, job: &Job) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = $2, progress = $3, message = $4, error = $5, \
         started_at = $6, completed_at = $7 WHERE id = $1",
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(i16::from(job.progress))
    .bind(&job.message)
    .bind(&job.error)
    .bind(job.started_at)
    .bind(job.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_job", e))?;
    Ok(())
}

async fn insert_file_in(conn: &mut PgConnection, file: &GeneratedFile) -> Result<()> {
    sqlx::query(
        "INSERT INTO generated_files \
         (id, job_id, owner_id, storage_key, content_type, format, width, height, size_bytes, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(file.id.as_uuid())
    .bind(file.job_id.as_uuid())
    .bind(file.owner_id.as_uuid())
    .bind(file.storage_key.to_string())
    .bind(&file.content_type)
    .bind(&file.format)
    .bind(file.width.and_then(|w| i32::try_from(w).ok()))
    .bind(file.height.and_then(|h| i32::try_from(h).ok()))
    .bind(file.size_bytes.and_then(|s| i64::try_from(s).ok()))
    .bind(file.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_file", e))?;
    Ok(())
}

impl PgStore {
    /// Lock a job, run `mutate`, and persist the result when it applied.
    async fn transition_job<F>(&self, id: &JobId, mutate: F) -> Result<JobTransition>
    where
        F: FnOnce(&mut Job) -> bool + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let mut job = lock_job(&mut tx, id).await?;
        if !mutate(&mut job) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(JobTransition::AlreadyTerminal(job));
        }
        write_job_state(&mut tx, &job).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(JobTransition::Applied(job))
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // User Operations
    // =========================================================================

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE external_id = $1");
        sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_external_id", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("{SELECT_USER} WHERE email = $1 ORDER BY email_updated_at DESC NULLS LAST LIMIT 1");
        sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_email", e))?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    #[instrument(skip(self, user), fields(external_id = %user.external_id))]
    async fn insert_user(&self, user: &User) -> Result<User> {
        let inserted = sqlx::query(
            "INSERT INTO users \
             (id, external_id, email, email_updated_at, credits, total_credits_used, \
              credits_updated_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (external_id) DO NOTHING RETURNING id",
        )
        .bind(user.id.as_uuid())
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(user.email_updated_at)
        .bind(user.credits)
        .bind(user.total_credits_used)
        .bind(user.credits_updated_at)
        .bind(user.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        if inserted.is_some() {
            return Ok(user.clone());
        }

        debug!("user already exists, returning stored record");
        self.get_user_by_external_id(&user.external_id)
            .await?
            .ok_or_else(|| StoreError::not_found("user", &user.external_id))
    }

    async fn set_user_email(&self, id: &UserId, email: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET email = $2, email_updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(email)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_user_email", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    #[instrument(skip(self, transaction), fields(user_id = %transaction.user_id, amount = transaction.amount))]
    async fn apply_ledger_entry(&self, transaction: &CreditTransaction) -> Result<LedgerUpdate> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Dropping `tx` on error rolls back.
        let update = apply_entry_in(&mut tx, transaction).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(update)
    }

    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transactions_by_user", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs \
             (id, author_id, kind, spec, cost, status, progress, message, error, \
              created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job.id.as_uuid())
        .bind(job.author_id.as_uuid())
        .bind(job.kind.as_str())
        .bind(Json(&job.spec))
        .bind(job.cost)
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(&job.message)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let sql = format!("{SELECT_JOB} WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?
            .as_ref()
            .map(job_from_row)
            .transpose()
    }

    async fn list_jobs_by_author(
        &self,
        author_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            "{SELECT_JOB} WHERE author_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(author_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs_by_author", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self, update), fields(job_id = %id, status = update.status.as_str()))]
    async fn update_job_progress(&self, id: &JobId, update: &JobProgress) -> Result<JobTransition> {
        let now = Utc::now();
        self.transition_job(id, |job| transition::apply_progress(job, update, now))
            .await
    }

    #[instrument(skip(self, files, message), fields(job_id = %id, files = files.len()))]
    async fn complete_job(
        &self,
        id: &JobId,
        files: &[GeneratedFile],
        message: Option<&str>,
    ) -> Result<JobTransition> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let mut job = lock_job(&mut tx, id).await?;
        if !transition::apply_completion(&mut job, message, Utc::now()) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(JobTransition::AlreadyTerminal(job));
        }

        write_job_state(&mut tx, &job).await?;
        for file in files {
            insert_file_in(&mut tx, file).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(JobTransition::Applied(job))
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn fail_job(&self, id: &JobId, error: &str) -> Result<JobTransition> {
        let now = Utc::now();
        self.transition_job(id, |job| transition::apply_failure(job, error, now))
            .await
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    async fn list_files_by_job(&self, job_id: &JobId) -> Result<Vec<GeneratedFile>> {
        let sql = format!("{SELECT_FILE} WHERE job_id = $1 ORDER BY storage_key");
        let rows = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_files_by_job", e))?;
        rows.iter().map(file_from_row).collect()
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<GeneratedFile>> {
        let sql = format!("{SELECT_FILE} WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_file", e))?
            .as_ref()
            .map(file_from_row)
            .transpose()
    }

    async fn delete_file(&self, id: &FileId) -> Result<()> {
        let result = sqlx::query("DELETE FROM generated_files WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_file", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("file", id));
        }
        Ok(())
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments \
             (reference, user_id, email, amount_minor, currency, credits, status, \
              provider_data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&payment.reference)
        .bind(payment.user_id.as_uuid())
        .bind(&payment.email)
        .bind(payment.amount_minor)
        .bind(&payment.currency)
        .bind(payment.credits)
        .bind(payment.status.as_str())
        .bind(&payment.provider_data)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>> {
        let sql = format!("{SELECT_PAYMENT} WHERE reference = $1");
        sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_payment", e))?
            .as_ref()
            .map(payment_from_row)
            .transpose()
    }

    async fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Payment>> {
        let sql = format!(
            "{SELECT_PAYMENT} WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_payments_by_user", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    #[instrument(skip(self, provider_data, grant), fields(status = status.as_str()))]
    async fn settle_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        provider_data: &serde_json::Value,
        grant: Option<&CreditTransaction>,
    ) -> Result<PaymentSettlement> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let sql = format!("{SELECT_PAYMENT} WHERE reference = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_payment", e))?
            .ok_or_else(|| StoreError::not_found("payment", reference))?;
        let mut payment = payment_from_row(&row)?;

        if payment.is_terminal() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(PaymentSettlement::AlreadySettled(payment));
        }

        let ledger = match (status, grant) {
            (PaymentStatus::Success, Some(grant)) => Some(apply_entry_in(&mut tx, grant).await?),
            _ => None,
        };

        payment.status = status;
        payment.provider_data = provider_data.clone();
        payment.updated_at = Utc::now();
        sqlx::query(
            "UPDATE payments SET status = $2, provider_data = $3, updated_at = $4 \
             WHERE reference = $1",
        )
        .bind(&payment.reference)
        .bind(payment.status.as_str())
        .bind(&payment.provider_data)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_payment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(PaymentSettlement::Settled { payment, ledger })
    }

    // =========================================================================
    // Plan & Subscription Operations
    // =========================================================================

    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        sqlx::query(
            "INSERT INTO plans (code, name, credits, amount_minor, interval) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name, credits = EXCLUDED.credits, \
             amount_minor = EXCLUDED.amount_minor, interval = EXCLUDED.interval",
        )
        .bind(&plan.code)
        .bind(&plan.name)
        .bind(plan.credits)
        .bind(plan.amount_minor)
        .bind(plan.interval.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_plan", e))?;
        Ok(())
    }

    async fn get_plan(&self, code: &str) -> Result<Option<Plan>> {
        sqlx::query("SELECT code, name, credits, amount_minor, interval FROM plans WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_plan", e))?
            .as_ref()
            .map(plan_from_row)
            .transpose()
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions \
             (id, user_id, plan_code, provider_code, email_token, status, created_at, cancelled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(&subscription.plan_code)
        .bind(&subscription.provider_code)
        .bind(&subscription.email_token)
        .bind(subscription.status.as_str())
        .bind(subscription.created_at)
        .bind(subscription.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_subscription", e))?;
        Ok(())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let sql = format!("{SELECT_SUBSCRIPTION} WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_subscription", e))?
            .as_ref()
            .map(subscription_from_row)
            .transpose()
    }

    async fn get_subscription_by_provider_code(
        &self,
        code: &str,
    ) -> Result<Option<Subscription>> {
        let sql = format!("{SELECT_SUBSCRIPTION} WHERE provider_code = $1");
        sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_subscription_by_provider_code", e))?
            .as_ref()
            .map(subscription_from_row)
            .transpose()
    }

    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let sql = format!(
            "{SELECT_SUBSCRIPTION} WHERE user_id = $1 AND status = 'ACTIVE' \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_subscription", e))?
            .as_ref()
            .map(subscription_from_row)
            .transpose()
    }

    async fn cancel_subscription(&self, id: &SubscriptionId) -> Result<Subscription> {
        sqlx::query(
            "UPDATE subscriptions SET status = 'CANCELLED', cancelled_at = $2 \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel_subscription", e))?;

        self.get_subscription(id)
            .await?
            .ok_or_else(|| StoreError::not_found("subscription", id))
    }

    // =========================================================================
    // Callback Idempotency
    // =========================================================================

    async fn claim_callback(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let claimed = sqlx::query(
            "INSERT INTO processed_callbacks (key, expires_at) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at \
             WHERE processed_callbacks.expires_at <= now() \
             RETURNING key",
        )
        .bind(key)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_callback", e))?;
        Ok(claimed.is_some())
    }

    async fn release_callback(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM processed_callbacks WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("release_callback", e))?;
        Ok(())
    }

    async fn purge_expired_callbacks(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_callbacks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired_callbacks", e))?;
        Ok(result.rows_affected())
    }
}
