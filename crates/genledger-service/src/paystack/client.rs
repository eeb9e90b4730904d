//! Paystack API client implementation.

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{
    DisableSubscription, InitializeTransaction, InitializedTransaction, PaystackResponse,
    VerifiedTransaction,
};
use crate::error::ApiError;

/// Timeout for every Paystack call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for Paystack operations.
#[derive(Debug, thiserror::Error)]
pub enum PaystackError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Paystack returned an error.
    #[error("Paystack API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PaystackError> for ApiError {
    fn from(err: PaystackError) -> Self {
        match err {
            PaystackError::Http(_) => Self::UpstreamUnavailable {
                message: err.to_string(),
                details: None,
            },
            PaystackError::Api { .. } | PaystackError::Serialization(_) => Self::UpstreamRejected {
                message: err.to_string(),
                details: None,
            },
        }
    }
}

/// Paystack API client.
#[derive(Debug, Clone)]
pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl PaystackClient {
    /// Create a new Paystack client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    /// Start a hosted checkout.
    pub async fn initialize_transaction(
        &self,
        request: &InitializeTransaction<'_>,
    ) -> Result<InitializedTransaction, PaystackError> {
        let url = format!("{}/transaction/initialize", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await?;

        let data: InitializedTransaction = self.handle_response(response).await?;
        tracing::debug!(reference = %data.reference, "Paystack transaction initialized");
        Ok(data)
    }

    /// Verify a transaction.
    ///
    /// Returns the parsed fields together with the raw `data` object.
    pub async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<(VerifiedTransaction, serde_json::Value), PaystackError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let raw: serde_json::Value = self.handle_response(response).await?;
        let parsed = serde_json::from_value(raw.clone())?;
        Ok((parsed, raw))
    }

    /// Disable a subscription.
    pub async fn disable_subscription(&self, code: &str, token: &str) -> Result<(), PaystackError> {
        let url = format!("{}/subscription/disable", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&DisableSubscription { code, token })
            .send()
            .await?;

        let status = response.status();
        let body: PaystackResponse<serde_json::Value> = response.json().await?;
        if !status.is_success() || !body.status {
            return Err(PaystackError::Api {
                status: status.as_u16(),
                message: body.message,
            });
        }
        Ok(())
    }

    /// Unwrap the `{status, message, data}` envelope.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, PaystackError> {
        let status = response.status();
        let body: Result<PaystackResponse<T>, _> = response.json().await;

        match body {
            Ok(PaystackResponse {
                status: true,
                data: Some(data),
                ..
            }) if status.is_success() => Ok(data),
            Ok(envelope) => Err(PaystackError::Api {
                status: status.as_u16(),
                message: envelope.message,
            }),
            Err(_) if !status.is_success() => Err(PaystackError::Api {
                status: status.as_u16(),
                message: format!("HTTP {status}"),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn verify_returns_parsed_and_raw_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transaction/verify/ref_1"))
            .and(header("authorization", "Bearer sk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": true,
                "message": "Verification successful",
                "data": {"status": "success", "reference": "ref_1", "amount": 1000, "gateway_response": "Approved"}
            })))
            .mount(&server)
            .await;

        let client = PaystackClient::new(server.uri(), "sk_test");
        let (parsed, raw) = client.verify_transaction("ref_1").await.unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(raw["gateway_response"], "Approved");
    }

    #[tokio::test]
    async fn error_envelope_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subscription/disable"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": false,
                "message": "Subscription with code not found"
            })))
            .mount(&server)
            .await;

        let client = PaystackClient::new(server.uri(), "sk_test");
        let err = client.disable_subscription("SUB_x", "tok").await.unwrap_err();
        assert!(matches!(err, PaystackError::Api { status: 400, .. }));
    }
}
