//! Job lifecycle: creation, dispatch and reconciliation of worker reports.
//!
//! A job is persisted PENDING (with its cost already deducted) before the
//! worker is called. From then on only three things move it: dispatch
//! acknowledgement (PROCESSING), worker reports through signed callbacks,
//! and status polls. Terminal states win: once COMPLETED or FAILED, later
//! reports are acknowledged and ignored.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde_json::json;

use genledger_core::{
    FileId, GeneratedFile, Job, JobId, JobKind, JobSpec, JobStatus, StorageKey, TransactionType,
    User, WorkerStatus,
};
use genledger_store::{JobProgress, JobTransition};

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::idempotency::job_terminal_key;
use crate::state::AppState;
use crate::worker::{Artifact, DispatchRequest, WorkerCallback, WorkerClient, WorkerReport};

/// Recorded when the worker reports failure without saying why.
pub const FAILURE_FALLBACK: &str = "Generation failed without an error from the worker";

/// Where the worker sends callbacks for `kind`.
#[must_use]
pub fn callback_url(config: &ServiceConfig, kind: JobKind) -> String {
    format!(
        "{}/webhooks/{}-completion",
        config.callback_base_url.trim_end_matches('/'),
        kind.as_str()
    )
}

// ============================================================================
// Creation & Dispatch
// ============================================================================

/// Charge for, persist and dispatch a new job.
///
/// Nothing is charged or stored when the spec is invalid, the worker is not
/// configured or the balance is short. A dispatch failure leaves the job
/// FAILED and is returned with the job id in the error details.
///
/// Once validation passes the charge, insert and dispatch run on their own
/// task, so a caller that goes away mid-request cannot leave a charged job
/// stuck in PENDING.
pub async fn create_job(
    state: &Arc<AppState>,
    author: &User,
    kind: JobKind,
    spec: JobSpec,
) -> Result<Job, ApiError> {
    spec.validate()?;

    let worker = state
        .worker
        .clone()
        .ok_or_else(|| ApiError::UpstreamUnavailable {
            message: "generation worker not configured".into(),
            details: None,
        })?;

    let cost = state.config.pricing.cost(kind, &spec);
    let job = Job::new(author.id, kind, spec, cost);

    let task = tokio::spawn(persist_and_dispatch(Arc::clone(state), worker, job));
    task.await.map_err(|e| {
        tracing::error!(error = %e, "Job creation task aborted");
        ApiError::Internal(format!("job creation task aborted: {e}"))
    })?
}

async fn persist_and_dispatch(
    state: Arc<AppState>,
    worker: Arc<WorkerClient>,
    job: Job,
) -> Result<Job, ApiError> {
    if job.cost > 0 {
        state
            .ledger
            .deduct(
                &job.author_id,
                job.cost,
                format!("{} generation", job.kind.as_str()),
                json!({ "job_id": job.id, "kind": job.kind }),
            )
            .await?;
    }

    if let Err(e) = state.store.insert_job(&job).await {
        tracing::error!(job_id = %job.id, error = %e, "Failed to record job after charging");
        refund(&state, &job, "Job could not be recorded").await;
        return Err(e.into());
    }

    tracing::info!(
        job_id = %job.id,
        user_id = %job.author_id,
        kind = job.kind.as_str(),
        cost = job.cost,
        "Job created"
    );

    dispatch(&state, &worker, &job)
        .await
        .map_err(|err| err.with_details(json!({ "job_id": job.id })))
}

/// Hand `job` to the worker.
///
/// On acknowledgement the job moves to PROCESSING. On any failure it is
/// marked FAILED with the reason and the error is returned.
pub async fn dispatch(
    state: &AppState,
    worker: &WorkerClient,
    job: &Job,
) -> Result<Job, ApiError> {
    let request = DispatchRequest {
        job_id: job.id,
        kind: job.kind,
        spec: &job.spec,
        user_id: job.author_id,
        callback_url: callback_url(&state.config, job.kind),
    };

    match worker.dispatch(&request).await {
        Ok(()) => {
            let update = JobProgress {
                status: JobStatus::Processing,
                progress: None,
                message: None,
            };
            let transition = state.store.update_job_progress(&job.id, &update).await?;
            tracing::debug!(job_id = %job.id, "Job dispatched");
            Ok(transition.job().clone())
        }
        Err(err) => {
            let reason = format!("Dispatch failed: {err}");
            tracing::warn!(job_id = %job.id, error = %err, "Job dispatch failed");

            if let Err(e) = state.store.fail_job(&job.id, &reason).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job FAILED");
            }
            if state.config.refund_on_dispatch_failure {
                refund(state, job, "Refund for failed dispatch").await;
            }
            Err(err.into())
        }
    }
}

async fn refund(state: &AppState, job: &Job, reason: &str) {
    if job.cost <= 0 {
        return;
    }
    if let Err(e) = state
        .ledger
        .credit(
            &job.author_id,
            job.cost,
            TransactionType::Refund,
            reason,
            json!({ "job_id": job.id }),
        )
        .await
    {
        tracing::error!(job_id = %job.id, error = %e, "Refund failed");
    }
}

// ============================================================================
// Worker Reports
// ============================================================================

/// Apply a signed worker callback for a job of `kind`.
pub async fn handle_callback(
    state: &AppState,
    kind: JobKind,
    callback: &WorkerCallback,
) -> Result<Job, ApiError> {
    let job = state
        .store
        .get_job(&callback.job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {}", callback.job_id)))?;

    if job.kind != kind {
        return Err(ApiError::BadRequest(format!(
            "job {} is a {} job",
            job.id,
            job.kind.as_str()
        )));
    }

    apply_status_update(state, &job, &callback.report).await
}

/// Apply a worker report to `job`.
///
/// COMPLETED and FAILED are routed to `apply_result` / `apply_failure`;
/// anything else records progress. Unrecognized statuses are logged and
/// recorded as PENDING, which never regresses a started job.
pub async fn apply_status_update(
    state: &AppState,
    job: &Job,
    report: &WorkerReport,
) -> Result<Job, ApiError> {
    let reported = WorkerStatus::parse(&report.status);
    if !reported.is_recognized() {
        tracing::warn!(job_id = %job.id, status = %report.status, "Unrecognized worker status");
    }

    match reported.status() {
        JobStatus::Completed => {
            let artifacts = report
                .result
                .as_ref()
                .map_or(&[][..], |result| result.files.as_slice());
            apply_result(state, job, artifacts, report.message.as_deref()).await
        }
        JobStatus::Failed => apply_failure(state, job, report.error.as_deref()).await,
        status => {
            let update = JobProgress {
                status,
                progress: report.clamped_progress(),
                message: report.message.clone(),
            };
            let transition = state.store.update_job_progress(&job.id, &update).await?;
            if !transition.is_applied() {
                tracing::debug!(job_id = %job.id, "Progress for terminal job ignored");
            }
            Ok(transition.job().clone())
        }
    }
}

/// Complete `job` with the reported artifacts, at most once.
///
/// Returns `AlreadyProcessed` when the job is already terminal or another
/// delivery of the same result holds the guard.
pub async fn apply_result(
    state: &AppState,
    job: &Job,
    artifacts: &[Artifact],
    message: Option<&str>,
) -> Result<Job, ApiError> {
    if job.is_terminal() {
        return Err(ApiError::AlreadyProcessed);
    }
    let key = job_terminal_key(&job.id);
    if !state.guard.admit(&key).await? {
        return Err(ApiError::AlreadyProcessed);
    }

    let mut files = Vec::with_capacity(artifacts.len());
    let mut uploaded = Vec::new();
    for (index, artifact) in artifacts.iter().enumerate() {
        match materialize(state, job, index, artifact).await {
            Ok((file, fresh)) => {
                if fresh {
                    uploaded.push(file.storage_key.clone());
                }
                files.push(file);
            }
            Err(e) => {
                discard(state, &uploaded).await;
                state.guard.release(&key).await;
                return Err(e);
            }
        }
    }

    match state.store.complete_job(&job.id, &files, message).await {
        Ok(JobTransition::Applied(job)) => {
            tracing::info!(job_id = %job.id, files = files.len(), "Job completed");
            Ok(job)
        }
        Ok(JobTransition::AlreadyTerminal(_)) => {
            discard(state, &uploaded).await;
            Err(ApiError::AlreadyProcessed)
        }
        Err(e) => {
            discard(state, &uploaded).await;
            state.guard.release(&key).await;
            Err(e.into())
        }
    }
}

/// Fail `job` with the worker's error, at most once.
pub async fn apply_failure(
    state: &AppState,
    job: &Job,
    error: Option<&str>,
) -> Result<Job, ApiError> {
    if job.is_terminal() {
        return Err(ApiError::AlreadyProcessed);
    }
    let key = job_terminal_key(&job.id);
    if !state.guard.admit(&key).await? {
        return Err(ApiError::AlreadyProcessed);
    }

    let error = error
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(FAILURE_FALLBACK);

    match state.store.fail_job(&job.id, error).await {
        Ok(JobTransition::Applied(job)) => {
            tracing::info!(job_id = %job.id, error = %error, "Job failed");
            Ok(job)
        }
        Ok(JobTransition::AlreadyTerminal(_)) => Err(ApiError::AlreadyProcessed),
        Err(e) => {
            state.guard.release(&key).await;
            Err(e.into())
        }
    }
}

/// Turn one artifact into a file record, downloading it when needed.
///
/// The flag is `true` when this call wrote the object.
async fn materialize(
    state: &AppState,
    job: &Job,
    index: usize,
    artifact: &Artifact,
) -> Result<(GeneratedFile, bool), ApiError> {
    let format = artifact
        .format
        .as_deref()
        .map(|f| f.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| job.kind.default_extension().to_string());
    let content_type = artifact
        .content_type
        .clone()
        .unwrap_or_else(|| job.kind.default_content_type().to_string());

    let (storage_key, size_bytes, fresh) = if let Some(raw) = &artifact.storage_key {
        let key: StorageKey = raw.parse()?;
        if !key.is_owned_by(&job.author_id) {
            tracing::warn!(job_id = %job.id, key = %raw, "Artifact key outside the author's prefix");
            return Err(ApiError::Forbidden);
        }
        (key, artifact.size_bytes, false)
    } else if let Some(url) = &artifact.url {
        let key = StorageKey::new(
            job.author_id,
            job.kind,
            job.id.to_string(),
            format!("{index}.{format}"),
        )?;
        let body = download(state, url).await?;
        let size = u64::try_from(body.len()).ok();
        state.objects.put(&key, body, &content_type).await?;
        (key, size, true)
    } else {
        return Err(ApiError::BadRequest(
            "artifact needs a storage_key or a url".into(),
        ));
    };

    Ok((
        GeneratedFile {
            id: FileId::generate(),
            job_id: job.id,
            owner_id: job.author_id,
            storage_key,
            content_type,
            format,
            width: artifact.width,
            height: artifact.height,
            size_bytes,
            created_at: Utc::now(),
        },
        fresh,
    ))
}

/// Fetch an artifact, refusing bodies over `max_artifact_bytes`.
async fn download(state: &AppState, url: &str) -> Result<Bytes, ApiError> {
    let limit = state.config.max_artifact_bytes;
    let unavailable = |e: reqwest::Error| ApiError::UpstreamUnavailable {
        message: format!("artifact download failed: {e}"),
        details: None,
    };
    let too_large = || ApiError::UpstreamRejected {
        message: format!("artifact exceeds {limit} bytes"),
        details: None,
    };

    let mut response = state.http.get(url).send().await.map_err(unavailable)?;

    if !response.status().is_success() {
        return Err(ApiError::UpstreamRejected {
            message: format!("artifact download returned HTTP {}", response.status()),
            details: None,
        });
    }

    if response.content_length().is_some_and(|len| len > limit) {
        tracing::warn!(url = %url, limit = limit, "Artifact too large, not downloading");
        return Err(too_large());
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(unavailable)? {
        if u64::try_from(body.len() + chunk.len()).unwrap_or(u64::MAX) > limit {
            tracing::warn!(url = %url, limit = limit, "Artifact exceeded limit mid-download");
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

async fn discard(state: &AppState, keys: &[StorageKey]) {
    for key in keys {
        if let Err(e) = state.objects.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to discard artifact");
        }
    }
}

// ============================================================================
// Status Polling
// ============================================================================

/// Bring a non-terminal job up to date by polling the worker.
///
/// Never fails: any problem falls back to the persisted state.
pub async fn refresh_status(state: &AppState, job: Job) -> Job {
    if job.is_terminal() {
        return job;
    }
    let Some(worker) = &state.worker else {
        return job;
    };

    let report = match worker.job_status(&job.id).await {
        Ok(report) => report,
        Err(e) => {
            tracing::debug!(job_id = %job.id, error = %e, "Status poll failed, using stored state");
            return job;
        }
    };

    match apply_status_update(state, &job, &report).await {
        Ok(updated) => updated,
        Err(e) => {
            if !matches!(e, ApiError::AlreadyProcessed) {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to apply polled status");
            }
            reload(state, &job.id).await.unwrap_or(job)
        }
    }
}

async fn reload(state: &AppState, id: &JobId) -> Option<Job> {
    state.store.get_job(id).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_is_per_kind() {
        let config = ServiceConfig {
            callback_base_url: "https://api.example.com/".into(),
            ..ServiceConfig::default()
        };
        assert_eq!(
            callback_url(&config, JobKind::Video),
            "https://api.example.com/webhooks/video-completion"
        );
    }
}
