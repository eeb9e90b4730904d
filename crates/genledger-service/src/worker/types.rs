//! Worker API types.

use serde::{Deserialize, Serialize};

use genledger_core::{JobId, JobKind, JobSpec, UserId};

/// Body of `POST {worker}/jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest<'a> {
    /// Correlation token echoed back in every callback.
    pub job_id: JobId,
    /// What to generate.
    pub kind: JobKind,
    /// The generation request.
    pub spec: &'a JobSpec,
    /// Requesting user.
    pub user_id: UserId,
    /// Where to send callbacks.
    pub callback_url: String,
}

/// A status report, from a callback body or a status poll.
///
/// Every field but `status` is optional; workers send what they have.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerReport {
    /// Worker-vocabulary status string.
    #[serde(default)]
    pub status: String,
    /// Progress percentage; may be fractional or out of range.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Produced artifacts, on completion.
    #[serde(default)]
    pub result: Option<WorkerResult>,
    /// Failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerReport {
    /// Progress clamped to 0-100.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clamped_progress(&self) -> Option<u8> {
        self.progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0).round() as u8)
    }
}

/// A signed callback from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerCallback {
    /// The job this callback is about.
    pub job_id: JobId,
    /// The report itself.
    #[serde(flatten)]
    pub report: WorkerReport,
}

/// Completion payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerResult {
    /// Produced files.
    #[serde(default)]
    pub files: Vec<Artifact>,
}

/// One produced file.
///
/// Either `storage_key` names an object the worker already uploaded under
/// the author's prefix, or `url` points at a file the service downloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Artifact {
    /// Object key in the shared store.
    #[serde(default)]
    pub storage_key: Option<String>,
    /// Download URL.
    #[serde(default)]
    pub url: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Format / extension.
    #[serde(default)]
    pub format: Option<String>,
    /// Pixel width.
    #[serde(default)]
    pub width: Option<u32>,
    /// Pixel height.
    #[serde(default)]
    pub height: Option<u32>,
    /// Size in bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}
