//! In-memory storage implementation.
//!
//! Every operation takes the same lock, so each trait method is atomic and
//! ledger changes for all users are serialized. Nothing is held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use genledger_core::{
    CreditTransaction, FileId, GeneratedFile, Job, JobId, Payment, PaymentStatus, Plan,
    Subscription, SubscriptionId, SubscriptionStatus, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::transition;
use crate::{JobProgress, JobTransition, LedgerUpdate, PaymentSettlement, Store};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    users_by_external_id: HashMap<String, UserId>,
    /// Append order is commit order.
    transactions: Vec<CreditTransaction>,
    jobs: HashMap<JobId, Job>,
    files: HashMap<FileId, GeneratedFile>,
    payments: HashMap<String, Payment>,
    plans: HashMap<String, Plan>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    callbacks: HashMap<String, DateTime<Utc>>,
}

impl Inner {
    fn apply_entry(&mut self, transaction: &CreditTransaction) -> Result<LedgerUpdate> {
        let user = self
            .users
            .get_mut(&transaction.user_id)
            .ok_or_else(|| StoreError::not_found("user", transaction.user_id))?;

        let mut updated = user.clone();
        let applied = transition::apply_entry(&mut updated, transaction, Utc::now())?;
        *user = updated.clone();
        self.transactions.push(applied.clone());

        Ok(LedgerUpdate {
            user: updated,
            transaction: applied,
        })
    }

    fn job_mut(&mut self, id: &JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("job", id))
    }
}

/// Single-process storage backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // User Operations
    // =========================================================================

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let inner = self.lock()?;
        Ok(inner
            .users_by_external_id
            .get(external_id)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .values()
            .filter(|user| user.email.as_deref() == Some(email))
            .max_by_key(|user| user.email_updated_at)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<User> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .users_by_external_id
            .get(&user.external_id)
            .and_then(|id| inner.users.get(id))
        {
            return Ok(existing.clone());
        }
        inner
            .users_by_external_id
            .insert(user.external_id.clone(), user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn set_user_email(&self, id: &UserId, email: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("user", id))?;
        user.email = Some(email.to_string());
        user.email_updated_at = Some(Utc::now());
        Ok(())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn apply_ledger_entry(&self, transaction: &CreditTransaction) -> Result<LedgerUpdate> {
        self.lock()?.apply_entry(transaction)
    }

    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.lock()?;
        Ok(page(
            inner
                .transactions
                .iter()
                .rev()
                .filter(|tx| tx.user_id == *user_id)
                .cloned(),
            limit,
            offset,
        ))
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate {
                key: job.id.to_string(),
            });
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    async fn list_jobs_by_author(
        &self,
        author_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let inner = self.lock()?;
        let mut jobs: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|job| job.author_id == *author_id)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(jobs.into_iter().cloned(), limit, offset))
    }

    async fn update_job_progress(&self, id: &JobId, update: &JobProgress) -> Result<JobTransition> {
        let mut inner = self.lock()?;
        let job = inner.job_mut(id)?;
        if transition::apply_progress(job, update, Utc::now()) {
            Ok(JobTransition::Applied(job.clone()))
        } else {
            Ok(JobTransition::AlreadyTerminal(job.clone()))
        }
    }

    async fn complete_job(
        &self,
        id: &JobId,
        files: &[GeneratedFile],
        message: Option<&str>,
    ) -> Result<JobTransition> {
        let mut inner = self.lock()?;
        let job = inner.job_mut(id)?;
        if !transition::apply_completion(job, message, Utc::now()) {
            return Ok(JobTransition::AlreadyTerminal(job.clone()));
        }
        let job = job.clone();
        for file in files {
            inner.files.insert(file.id, file.clone());
        }
        Ok(JobTransition::Applied(job))
    }

    async fn fail_job(&self, id: &JobId, error: &str) -> Result<JobTransition> {
        let mut inner = self.lock()?;
        let job = inner.job_mut(id)?;
        if transition::apply_failure(job, error, Utc::now()) {
            Ok(JobTransition::Applied(job.clone()))
        } else {
            Ok(JobTransition::AlreadyTerminal(job.clone()))
        }
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    async fn list_files_by_job(&self, job_id: &JobId) -> Result<Vec<GeneratedFile>> {
        let inner = self.lock()?;
        let mut files: Vec<GeneratedFile> = inner
            .files
            .values()
            .filter(|file| file.job_id == *job_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.storage_key.name().cmp(b.storage_key.name()));
        Ok(files)
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<GeneratedFile>> {
        Ok(self.lock()?.files.get(id).cloned())
    }

    async fn delete_file(&self, id: &FileId) -> Result<()> {
        self.lock()?
            .files
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("file", id))
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.payments.contains_key(&payment.reference) {
            return Err(StoreError::Duplicate {
                key: payment.reference.clone(),
            });
        }
        inner
            .payments
            .insert(payment.reference.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, reference: &str) -> Result<Option<Payment>> {
        Ok(self.lock()?.payments.get(reference).cloned())
    }

    async fn list_payments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Payment>> {
        let inner = self.lock()?;
        let mut payments: Vec<&Payment> = inner
            .payments
            .values()
            .filter(|payment| payment.user_id == *user_id)
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(payments.into_iter().cloned(), limit, offset))
    }

    async fn settle_payment(
        &self,
        reference: &str,
        status: PaymentStatus,
        provider_data: &serde_json::Value,
        grant: Option<&CreditTransaction>,
    ) -> Result<PaymentSettlement> {
        let mut inner = self.lock()?;
        let current = inner
            .payments
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::not_found("payment", reference))?;

        if current.is_terminal() {
            return Ok(PaymentSettlement::AlreadySettled(current));
        }

        // Apply the grant before touching the payment so a failed credit
        // leaves the payment PENDING.
        let ledger = match (status, grant) {
            (PaymentStatus::Success, Some(grant)) => Some(inner.apply_entry(grant)?),
            _ => None,
        };

        let mut payment = current;
        payment.status = status;
        payment.provider_data = provider_data.clone();
        payment.updated_at = Utc::now();
        inner
            .payments
            .insert(payment.reference.clone(), payment.clone());

        Ok(PaymentSettlement::Settled { payment, ledger })
    }

    // =========================================================================
    // Plan & Subscription Operations
    // =========================================================================

    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.lock()?.plans.insert(plan.code.clone(), plan.clone());
        Ok(())
    }

    async fn get_plan(&self, code: &str) -> Result<Option<Plan>> {
        Ok(self.lock()?.plans.get(code).cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(code) = &subscription.provider_code {
            if inner
                .subscriptions
                .values()
                .any(|existing| existing.provider_code.as_ref() == Some(code))
            {
                return Err(StoreError::Duplicate { key: code.clone() });
            }
        }
        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(id).cloned())
    }

    async fn get_subscription_by_provider_code(
        &self,
        code: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .find(|sub| sub.provider_code.as_deref() == Some(code))
            .cloned())
    }

    async fn active_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .filter(|sub| sub.user_id == *user_id && sub.is_active())
            .max_by_key(|sub| sub.created_at)
            .cloned())
    }

    async fn cancel_subscription(&self, id: &SubscriptionId) -> Result<Subscription> {
        let mut inner = self.lock()?;
        let sub = inner
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("subscription", id))?;
        if sub.is_active() {
            sub.status = SubscriptionStatus::Cancelled;
            sub.cancelled_at = Some(Utc::now());
        }
        Ok(sub.clone())
    }

    // =========================================================================
    // Callback Idempotency
    // =========================================================================

    async fn claim_callback(&self, key: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        match inner.callbacks.get(key) {
            Some(existing) if *existing > now => Ok(false),
            _ => {
                inner.callbacks.insert(key.to_string(), expires_at);
                Ok(true)
            }
        }
    }

    async fn release_callback(&self, key: &str) -> Result<()> {
        self.lock()?.callbacks.remove(key);
        Ok(())
    }

    async fn purge_expired_callbacks(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock()?;
        let before = inner.callbacks.len();
        inner.callbacks.retain(|_, expires_at| *expires_at > now);
        Ok(u64::try_from(before - inner.callbacks.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use genledger_core::{JobKind, JobSpec, JobStatus, StorageKey, TransactionType};

    use super::*;

    async fn store_with_user(credits: i64) -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let user = store
            .insert_user(&User::new("user_test", credits))
            .await
            .unwrap();
        (store, user)
    }

    fn file_for(job: &Job, n: usize) -> GeneratedFile {
        GeneratedFile {
            id: FileId::generate(),
            job_id: job.id,
            owner_id: job.author_id,
            storage_key: StorageKey::new(
                job.author_id,
                job.kind,
                job.id.to_string(),
                format!("{n}.png"),
            )
            .unwrap(),
            content_type: "image/png".into(),
            format: "png".into(),
            width: Some(1024),
            height: Some(1024),
            size_bytes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_user_returns_existing_on_conflict() {
        let (store, first) = store_with_user(100).await;
        let second = store
            .insert_user(&User::new("user_test", 500))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.credits, 100);
    }

    #[tokio::test]
    async fn email_lookup_prefers_latest_recorded_email() {
        let store = MemoryStore::new();
        let older = store.insert_user(&User::new("user_a", 100)).await.unwrap();
        let newer = store.insert_user(&User::new("user_b", 100)).await.unwrap();

        store.set_user_email(&older.id, "shared@example.com").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.set_user_email(&newer.id, "shared@example.com").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // A later balance change on the older account must not win the lookup.
        let usage = CreditTransaction::usage(older.id, 10, "image", serde_json::Value::Null);
        store.apply_ledger_entry(&usage).await.unwrap();

        let found = store
            .get_user_by_email("shared@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
        assert!(found.email_updated_at.is_some());
    }

    #[tokio::test]
    async fn deduct_appends_one_usage_row() {
        let (store, user) = store_with_user(100).await;
        let tx = CreditTransaction::usage(user.id, 30, "image", serde_json::Value::Null);

        let update = store.apply_ledger_entry(&tx).await.unwrap();
        assert_eq!(update.user.credits, 70);
        assert_eq!(update.user.total_credits_used, 30);

        let rows = store
            .list_transactions_by_user(&user.id, 10, 0)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, -30);
        assert_eq!(rows[0].balance_after, 70);
        assert_eq!(rows[0].transaction_type, TransactionType::Usage);
    }

    #[tokio::test]
    async fn insufficient_credits_changes_nothing() {
        let (store, user) = store_with_user(10).await;
        let tx = CreditTransaction::usage(user.id, 11, "video", serde_json::Value::Null);

        let err = store.apply_ledger_entry(&tx).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientCredits { .. }));

        let after = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(after, user);
        assert!(store
            .list_transactions_by_user(&user.id, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = MemoryStore::new();
        let tx = CreditTransaction::usage(UserId::generate(), 1, "x", serde_json::Value::Null);
        assert!(matches!(
            store.apply_ledger_entry(&tx).await,
            Err(StoreError::NotFound { entity: "user", .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_deducts_never_overdraw() {
        let (store, user) = store_with_user(50).await;
        let store = Arc::new(store);
        let user_id = user.id;

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let tx =
                        CreditTransaction::usage(user_id, 1, "image", serde_json::Value::Null);
                    store.apply_ledger_entry(&tx).await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 50);
        let after = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(after.credits, 0);
        assert_eq!(after.total_credits_used, 50);
    }

    #[tokio::test]
    async fn transactions_list_newest_first_with_paging() {
        let (store, user) = store_with_user(0).await;
        for amount in 1..=3 {
            let tx = CreditTransaction::credit(
                user.id,
                amount,
                TransactionType::Bonus,
                "bonus",
                serde_json::Value::Null,
            );
            store.apply_ledger_entry(&tx).await.unwrap();
        }

        let rows = store
            .list_transactions_by_user(&user.id, 2, 0)
            .await
            .unwrap();
        assert_eq!(
            rows.iter().map(|tx| tx.amount).collect::<Vec<_>>(),
            vec![3, 2]
        );
        let rest = store
            .list_transactions_by_user(&user.id, 2, 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].amount, 1);
    }

    #[tokio::test]
    async fn complete_job_is_applied_once() {
        let (store, user) = store_with_user(100).await;
        let job = Job::new(user.id, JobKind::Image, JobSpec::new("a fox"), 10);
        store.insert_job(&job).await.unwrap();

        let files = vec![file_for(&job, 0), file_for(&job, 1)];
        let first = store.complete_job(&job.id, &files, None).await.unwrap();
        assert!(first.is_applied());
        assert_eq!(first.job().status, JobStatus::Completed);
        assert_eq!(first.job().progress, 100);

        let again = vec![file_for(&job, 2)];
        let second = store.complete_job(&job.id, &again, None).await.unwrap();
        assert!(!second.is_applied());
        assert_eq!(store.list_files_by_job(&job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn processing_after_failed_is_ignored() {
        let (store, user) = store_with_user(100).await;
        let job = Job::new(user.id, JobKind::Video, JobSpec::new("waves"), 50);
        store.insert_job(&job).await.unwrap();

        store.fail_job(&job.id, "gpu lost").await.unwrap();
        let update = JobProgress {
            status: JobStatus::Processing,
            progress: Some(20),
            message: None,
        };
        let result = store.update_job_progress(&job.id, &update).await.unwrap();

        assert!(!result.is_applied());
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("gpu lost"));
    }

    #[tokio::test]
    async fn payment_settles_and_grants_once() {
        let (store, user) = store_with_user(0).await;
        let payment = Payment::new("ref_1", user.id, "a@b.c", 5_000, "NGN", 50);
        store.insert_payment(&payment).await.unwrap();

        let grant = CreditTransaction::purchase(user.id, 50, "ref_1");
        let data = serde_json::json!({"status": "success"});
        let first = store
            .settle_payment("ref_1", PaymentStatus::Success, &data, Some(&grant))
            .await
            .unwrap();
        assert!(matches!(
            first,
            PaymentSettlement::Settled {
                ledger: Some(_),
                ..
            }
        ));

        let grant_again = CreditTransaction::purchase(user.id, 50, "ref_1");
        let second = store
            .settle_payment("ref_1", PaymentStatus::Success, &data, Some(&grant_again))
            .await
            .unwrap();
        assert!(matches!(second, PaymentSettlement::AlreadySettled(_)));

        let after = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(after.credits, 50);
    }

    #[tokio::test]
    async fn pending_settlement_keeps_payment_open() {
        let (store, user) = store_with_user(0).await;
        store
            .insert_payment(&Payment::new("ref_2", user.id, "a@b.c", 100, "NGN", 1))
            .await
            .unwrap();

        let data = serde_json::json!({"status": "ongoing"});
        let result = store
            .settle_payment("ref_2", PaymentStatus::Pending, &data, None)
            .await
            .unwrap();
        assert_eq!(result.payment().status, PaymentStatus::Pending);
        assert_eq!(result.payment().provider_data, data);
    }

    #[tokio::test]
    async fn callback_claims_are_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let later = Utc::now() + Duration::minutes(5);

        assert!(store.claim_callback("job:1:terminal", later).await.unwrap());
        assert!(!store.claim_callback("job:1:terminal", later).await.unwrap());

        store.release_callback("job:1:terminal").await.unwrap();
        assert!(store.claim_callback("job:1:terminal", later).await.unwrap());
    }

    #[tokio::test]
    async fn expired_claims_are_readmitted_and_purged() {
        let store = MemoryStore::new();
        let past = Utc::now() - Duration::seconds(1);

        assert!(store.claim_callback("a", past).await.unwrap());
        assert!(store.claim_callback("a", past).await.unwrap());
        assert!(store.claim_callback("b", past).await.unwrap());

        assert_eq!(store.purge_expired_callbacks(Utc::now()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancel_subscription_is_idempotent() {
        let (store, user) = store_with_user(0).await;
        let mut sub = Subscription::new(user.id, "PLN_basic");
        sub.provider_code = Some("SUB_1".into());
        store.insert_subscription(&sub).await.unwrap();

        assert!(store.active_subscription(&user.id).await.unwrap().is_some());
        let first = store.cancel_subscription(&sub.id).await.unwrap();
        let second = store.cancel_subscription(&sub.id).await.unwrap();
        assert_eq!(first.cancelled_at, second.cancelled_at);
        assert!(store.active_subscription(&user.id).await.unwrap().is_none());
    }
}
