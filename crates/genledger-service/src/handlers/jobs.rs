//! Generation job handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use genledger_core::{GeneratedFile, Job, JobId, JobKind, JobSpec};

use super::{split_page, PageQuery};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::jobs;
use crate::state::AppState;

/// Create job request.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// What to generate.
    pub kind: JobKind,
    /// The generation request.
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// A generated file.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    /// File ID.
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// Object-store key.
    pub storage_key: String,
    /// MIME type.
    pub content_type: String,
    /// Format / extension.
    pub format: String,
    /// Pixel width.
    pub width: Option<u32>,
    /// Pixel height.
    pub height: Option<u32>,
    /// Size in bytes.
    pub size_bytes: Option<u64>,
    /// Presigned download URL, on single-file reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&GeneratedFile> for FileResponse {
    fn from(file: &GeneratedFile) -> Self {
        Self {
            id: file.id.to_string(),
            job_id: file.job_id.to_string(),
            storage_key: file.storage_key.to_string(),
            content_type: file.content_type.clone(),
            format: file.format.clone(),
            width: file.width,
            height: file.height,
            size_bytes: file.size_bytes,
            url: None,
            created_at: file.created_at.to_rfc3339(),
        }
    }
}

/// Job status in the frontend vocabulary.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job ID.
    pub id: String,
    /// Job kind.
    pub kind: JobKind,
    /// `PENDING`, `INITIALIZING`, `GENERATING`, `COMPLETED` or `FAILED`.
    pub status: &'static str,
    /// Lower-case status for older clients.
    pub legacy_status: &'static str,
    /// Progress, 0-100.
    pub progress: u8,
    /// Latest worker message.
    pub message: Option<String>,
    /// Failure reason.
    pub error: Option<String>,
    /// Credits charged.
    pub cost: i64,
    /// Created.
    pub created_at: String,
    /// Accepted by the worker.
    pub started_at: Option<String>,
    /// Reached a terminal state.
    pub completed_at: Option<String>,
    /// Generated files, on single-job reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileResponse>>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        let status = job.status.to_frontend();
        Self {
            id: job.id.to_string(),
            kind: job.kind,
            status: status.as_str(),
            legacy_status: status.legacy_str(),
            progress: job.progress,
            message: job.message.clone(),
            error: job.error.clone(),
            cost: job.cost,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            files: None,
        }
    }
}

/// Charge for and dispatch a generation job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = jobs::create_job(&state, &auth.user, req.kind, req.spec).await?;
    Ok(Json(JobResponse::from(&job)))
}

/// List jobs response.
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    /// Jobs (newest first).
    pub jobs: Vec<JobResponse>,
    /// Whether there are more jobs.
    pub has_more: bool,
}

/// List the caller's jobs.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = query.limit();
    let jobs = state
        .store
        .list_jobs_by_author(&auth.user.id, limit + 1, query.offset)
        .await?;

    let (jobs, has_more) = split_page(jobs, limit);

    Ok(Json(ListJobsResponse {
        jobs: jobs.iter().map(JobResponse::from).collect(),
        has_more,
    }))
}

/// Get a job, refreshed from the worker when still running.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<JobId>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .store
        .get_job(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {id}")))?;

    if job.author_id != auth.user.id {
        return Err(ApiError::Forbidden);
    }

    let job = jobs::refresh_status(&state, job).await;
    let files = state.store.list_files_by_job(&job.id).await?;

    let mut response = JobResponse::from(&job);
    response.files = Some(files.iter().map(FileResponse::from).collect());
    Ok(Json(response))
}
