//! Status vocabularies and the mapping between them.
//!
//! A job status crosses three boundaries:
//!
//! | Persisted    | Worker       | Frontend                    |
//! |--------------|--------------|-----------------------------|
//! | `PENDING`    | `pending`    | `PENDING` / `pending`       |
//! | `PROCESSING` | `processing` | `INITIALIZING` / `processing` |
//! | `GENERATING` | `generating` | `GENERATING` / `generating` |
//! | `COMPLETED`  | `completed`  | `COMPLETED` / `completed`   |
//! | `FAILED`     | `failed`     | `FAILED` / `failed`         |
//!
//! Every conversion here is total. Unknown worker strings never fail; they
//! become `WorkerStatus::Unrecognized` and fall back to `JobStatus::Pending`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Persisted job status.
///
/// `Completed` and `Failed` are terminal; nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not yet accepted by the worker.
    Pending,
    /// Accepted by the worker.
    Processing,
    /// Worker is producing output.
    Generating,
    /// Output stored.
    Completed,
    /// Generation failed.
    Failed,
}

impl JobStatus {
    /// Every persisted status.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Generating,
        Self::Completed,
        Self::Failed,
    ];

    /// Persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "job status",
                value: value.to_string(),
            })
    }

    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The worker's spelling of this status.
    #[must_use]
    pub const fn worker_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// The frontend representation of this status.
    #[must_use]
    pub const fn to_frontend(self) -> FrontendStatus {
        match self {
            Self::Pending => FrontendStatus::Pending,
            Self::Processing => FrontendStatus::Initializing,
            Self::Generating => FrontendStatus::Generating,
            Self::Completed => FrontendStatus::Completed,
            Self::Failed => FrontendStatus::Failed,
        }
    }

    /// The persisted status behind a frontend status.
    #[must_use]
    pub const fn from_frontend(status: FrontendStatus) -> Self {
        match status {
            FrontendStatus::Pending => Self::Pending,
            FrontendStatus::Initializing => Self::Processing,
            FrontendStatus::Generating => Self::Generating,
            FrontendStatus::Completed => Self::Completed,
            FrontendStatus::Failed => Self::Failed,
        }
    }

    /// Position along the success path. Terminal states rank highest.
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Generating => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// Resolve the status a job should hold after `reported` arrives.
    ///
    /// Returns `None` when the job is already terminal. Non-terminal
    /// regressions delivered out of order keep the current status.
    #[must_use]
    pub fn advance(self, reported: Self) -> Option<Self> {
        if self.is_terminal() {
            return None;
        }
        if reported.rank() >= self.rank() {
            Some(reported)
        } else {
            Some(self)
        }
    }
}

/// A status string reported by the external worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// A status in the known vocabulary.
    Known(JobStatus),
    /// Anything else, kept verbatim for logging.
    Unrecognized(String),
}

impl WorkerStatus {
    /// Parse a worker status. Case-insensitive; never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        let status = match normalized.as_str() {
            "pending" | "queued" => JobStatus::Pending,
            "processing" | "started" => JobStatus::Processing,
            "generating" => JobStatus::Generating,
            "completed" | "success" | "succeeded" => JobStatus::Completed,
            "failed" | "error" => JobStatus::Failed,
            _ => return Self::Unrecognized(raw.to_string()),
        };
        Self::Known(status)
    }

    /// The persisted status to record. Unrecognized input falls back to `Pending`.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Known(status) => *status,
            Self::Unrecognized(_) => JobStatus::Pending,
        }
    }

    /// Whether the input was in the known vocabulary.
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Frontend-facing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrontendStatus {
    /// Waiting for the worker.
    Pending,
    /// Worker accepted the job.
    Initializing,
    /// Output is being produced.
    Generating,
    /// Done.
    Completed,
    /// Failed.
    Failed,
}

impl FrontendStatus {
    /// Upper-case label used by the status endpoints.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Initializing => "INITIALIZING",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Lower-case label used by older list views.
    #[must_use]
    pub const fn legacy_str(self) -> &'static str {
        JobStatus::from_frontend(self).worker_str()
    }

    /// Parse either the upper-case label or the lower-case legacy label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        JobStatus::ALL
            .into_iter()
            .map(JobStatus::to_frontend)
            .find(|status| status.as_str() == value || status.legacy_str() == value)
    }
}

/// Local payment status.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Checkout opened, not settled.
    Pending,
    /// Paid.
    Success,
    /// Declined or abandoned for good.
    Failed,
}

impl PaymentStatus {
    /// Persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::UnknownVariant` for anything else.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(CoreError::UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }

    /// Map a provider transaction status: `success`, `failed`, anything else pending.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Whether the payment is settled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_round_trip_is_identity() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_frontend(status.to_frontend()), status);
        }
    }

    #[test]
    fn frontend_labels_parse_back() {
        for status in JobStatus::ALL {
            let frontend = status.to_frontend();
            assert_eq!(FrontendStatus::parse(frontend.as_str()), Some(frontend));
            assert_eq!(FrontendStatus::parse(frontend.legacy_str()), Some(frontend));
        }
        assert_eq!(FrontendStatus::parse("bogus"), None);
    }

    #[test]
    fn processing_is_initializing_on_the_frontend() {
        assert_eq!(JobStatus::Processing.to_frontend().as_str(), "INITIALIZING");
        assert_eq!(JobStatus::Processing.to_frontend().legacy_str(), "processing");
    }

    #[test]
    fn worker_round_trip_is_identity() {
        for status in JobStatus::ALL {
            assert_eq!(WorkerStatus::parse(status.worker_str()).status(), status);
        }
    }

    #[test]
    fn unknown_worker_status_falls_back_to_pending() {
        let parsed = WorkerStatus::parse("exploded");
        assert!(!parsed.is_recognized());
        assert_eq!(parsed.status(), JobStatus::Pending);
    }

    #[test]
    fn worker_status_is_case_insensitive() {
        assert_eq!(
            WorkerStatus::parse(" COMPLETED ").status(),
            JobStatus::Completed
        );
        assert_eq!(WorkerStatus::parse("Success").status(), JobStatus::Completed);
    }

    #[test]
    fn terminal_states_do_not_advance() {
        assert_eq!(JobStatus::Failed.advance(JobStatus::Processing), None);
        assert_eq!(JobStatus::Completed.advance(JobStatus::Failed), None);
    }

    #[test]
    fn out_of_order_regression_keeps_current_status() {
        assert_eq!(
            JobStatus::Generating.advance(JobStatus::Processing),
            Some(JobStatus::Generating)
        );
        assert_eq!(
            JobStatus::Pending.advance(JobStatus::Failed),
            Some(JobStatus::Failed)
        );
    }

    #[test]
    fn persisted_parse_matches_as_str() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("pending").is_err());
    }

    #[test]
    fn provider_payment_status_mapping() {
        assert_eq!(PaymentStatus::from_provider("success"), PaymentStatus::Success);
        assert_eq!(PaymentStatus::from_provider("failed"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_provider("abandoned"), PaymentStatus::Pending);
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
    }
}
