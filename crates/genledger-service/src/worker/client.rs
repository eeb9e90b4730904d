//! Generation worker HTTP client.

use reqwest::Client;
use std::time::Duration;

use genledger_core::JobId;

use super::types::{DispatchRequest, WorkerReport};
use crate::error::ApiError;

/// Timeout for `POST /jobs`.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `GET /jobs/{id}` status polls.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for worker operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker could not be reached or timed out.
    #[error("worker unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The worker answered with a non-success status.
    #[error("worker returned HTTP {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Http(_) => Self::UpstreamUnavailable {
                message: err.to_string(),
                details: None,
            },
            WorkerError::Api { .. } => Self::UpstreamRejected {
                message: err.to_string(),
                details: None,
            },
        }
    }
}

/// Generation worker client.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl WorkerClient {
    /// Create a new worker client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Hand a job to the worker.
    pub async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<(), WorkerError> {
        let url = format!("{}/jobs", self.base_url);

        tracing::debug!(job_id = %request.job_id, kind = request.kind.as_str(), "Dispatching job to worker");

        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Poll the worker for a job's current state.
    pub async fn job_status(&self, job_id: &JobId) -> Result<WorkerReport, WorkerError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);

        let response = self
            .authorized(self.client.get(&url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, WorkerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect();
        Err(WorkerError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = WorkerClient::new("http://worker:9000/", None);
        assert_eq!(client.base_url, "http://worker:9000");
    }

    #[test]
    fn api_error_maps_to_bad_gateway() {
        let err: ApiError = WorkerError::Api {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }
}
