//! Generation job types for genledger.
//!
//! A job is a unit of asynchronous work performed by the external worker.
//! Its id doubles as the correlation token the worker echoes back in every
//! callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::storage::StorageKey;
use crate::{FileId, JobId, UserId};

/// Upper bound on `JobSpec::quantity`.
pub const MAX_JOB_QUANTITY: u32 = 20;

/// Maximum prompt length in characters.
const MAX_PROMPT_CHARS: usize = 8_000;

/// What a job generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Image generation.
    Image,
    /// Video generation.
    Video,
    /// Blog article generation.
    Blog,
    /// Book generation.
    Book,
}

impl JobKind {
    /// Every job kind.
    pub const ALL: [Self; 4] = [Self::Image, Self::Video, Self::Blog, Self::Book];

    /// Stable lower-case name, used in callback paths and storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Blog => "blog",
            Self::Book => "book",
        }
    }

    /// Parse the stable name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "job kind",
                value: value.to_string(),
            })
    }

    /// File extension used when the worker does not report a format.
    #[must_use]
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Video => "mp4",
            Self::Blog => "md",
            Self::Book => "pdf",
        }
    }

    /// Content type used when the worker does not report one.
    #[must_use]
    pub const fn default_content_type(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Video => "video/mp4",
            Self::Blog => "text/markdown",
            Self::Book => "application/pdf",
        }
    }
}

/// What the worker should generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Generation prompt.
    pub prompt: String,

    /// Number of outputs (images, clips, chapters, ...).
    #[serde(default = "default_quantity")]
    pub quantity: u32,

    /// Kind-specific options forwarded verbatim to the worker.
    #[serde(default)]
    pub options: serde_json::Value,
}

const fn default_quantity() -> u32 {
    1
}

impl JobSpec {
    /// Create a spec for a single output.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            quantity: 1,
            options: serde_json::Value::Null,
        }
    }

    /// Set the quantity.
    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Validate the spec before any credits move.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSpec` for an empty or oversized prompt or a
    /// quantity outside `1..=MAX_JOB_QUANTITY`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::InvalidSpec("prompt must not be empty".into()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(CoreError::InvalidSpec(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        if self.quantity == 0 || self.quantity > MAX_JOB_QUANTITY {
            return Err(CoreError::InvalidSpec(format!(
                "quantity must be between 1 and {MAX_JOB_QUANTITY}"
            )));
        }
        Ok(())
    }
}

/// Per-kind credit prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPricing {
    /// Credits per image.
    pub image: i64,
    /// Credits per video.
    pub video: i64,
    /// Credits per blog article.
    pub blog: i64,
    /// Credits per book.
    pub book: i64,
}

impl Default for JobPricing {
    fn default() -> Self {
        Self {
            image: 10,
            video: 50,
            blog: 5,
            book: 100,
        }
    }
}

impl JobPricing {
    /// Credits charged for one unit of `kind`.
    #[must_use]
    pub const fn unit_cost(&self, kind: JobKind) -> i64 {
        match kind {
            JobKind::Image => self.image,
            JobKind::Video => self.video,
            JobKind::Blog => self.blog,
            JobKind::Book => self.book,
        }
    }

    /// Credits charged for a whole spec.
    #[must_use]
    pub fn cost(&self, kind: JobKind, spec: &JobSpec) -> i64 {
        self.unit_cost(kind)
            .saturating_mul(i64::from(spec.quantity))
    }
}

/// A generation job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID and worker correlation token.
    pub id: JobId,

    /// The user who requested the job.
    pub author_id: UserId,

    /// What is generated.
    pub kind: JobKind,

    /// The request forwarded to the worker.
    pub spec: JobSpec,

    /// Credits deducted for this job.
    pub cost: i64,

    /// Current status.
    pub status: JobStatus,

    /// Progress percentage, 0-100.
    pub progress: u8,

    /// Latest worker message.
    pub message: Option<String>,

    /// Failure reason once FAILED.
    pub error: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the worker accepted the job.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new PENDING job.
    #[must_use]
    pub fn new(author_id: UserId, kind: JobKind, spec: JobSpec, cost: i64) -> Self {
        Self {
            id: JobId::generate(),
            author_id,
            kind,
            spec,
            cost,
            status: JobStatus::Pending,
            progress: 0,
            message: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the job is COMPLETED or FAILED.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A file produced by a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// File ID.
    pub id: FileId,

    /// Owning job.
    pub job_id: JobId,

    /// Owning user (the job author).
    pub owner_id: UserId,

    /// Object-store key.
    pub storage_key: StorageKey,

    /// MIME type.
    pub content_type: String,

    /// Format / extension (`png`, `mp4`, ...).
    pub format: String,

    /// Pixel width, for images and video.
    pub width: Option<u32>,

    /// Pixel height, for images and video.
    pub height: Option<u32>,

    /// Size in bytes, when known.
    pub size_bytes: Option<u64>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending() {
        let job = Job::new(UserId::generate(), JobKind::Image, JobSpec::new("a cat"), 10);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(!job.is_terminal());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn spec_validation() {
        assert!(JobSpec::new("a cat").validate().is_ok());
        assert!(JobSpec::new("   ").validate().is_err());
        assert!(JobSpec::new("a cat").with_quantity(0).validate().is_err());
        assert!(JobSpec::new("a cat")
            .with_quantity(MAX_JOB_QUANTITY + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn spec_quantity_defaults_to_one() {
        let spec: JobSpec = serde_json::from_value(serde_json::json!({"prompt": "x"})).unwrap();
        assert_eq!(spec.quantity, 1);
        assert!(spec.options.is_null());
    }

    #[test]
    fn pricing_scales_with_quantity() {
        let pricing = JobPricing::default();
        let spec = JobSpec::new("chapters").with_quantity(5);
        assert_eq!(pricing.cost(JobKind::Book, &spec), 500);
        assert_eq!(pricing.cost(JobKind::Image, &JobSpec::new("x")), 10);
    }

    #[test]
    fn kind_parse_matches_as_str() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(JobKind::parse("podcast").is_err());
    }
}
