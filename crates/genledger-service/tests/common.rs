//! Common test utilities for genledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use genledger_core::User;
use genledger_service::auth::JwtClaims;
use genledger_service::crypto::hmac_sha512_hex;
use genledger_service::{create_router, AppState, MemoryObjectStore, ServiceConfig};
use genledger_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const WORKER_SECRET: &str = "test-worker-secret";
pub const PAYSTACK_SECRET: &str = "sk_test_paystack";
pub const TEST_SUBJECT: &str = "user_test_subject";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the service, for assertions.
    pub store: Arc<MemoryStore>,
    /// The object store behind the service.
    pub objects: Arc<MemoryObjectStore>,
    /// Mock generation worker, when requested.
    pub worker: Option<MockServer>,
    /// Mock Paystack API, when requested.
    pub paystack: Option<MockServer>,
    /// Identity subject used by the request helpers.
    pub subject: String,
}

/// Options for building a harness.
#[derive(Default)]
pub struct HarnessBuilder {
    worker: bool,
    worker_url: Option<String>,
    paystack: bool,
    signup_credits: Option<i64>,
    refund_on_dispatch_failure: bool,
    max_artifact_bytes: Option<u64>,
}

impl HarnessBuilder {
    /// Start a mock worker.
    pub fn worker(mut self) -> Self {
        self.worker = true;
        self
    }

    /// Point the worker client somewhere specific.
    pub fn worker_url(mut self, url: &str) -> Self {
        self.worker_url = Some(url.to_string());
        self
    }

    /// Start a mock Paystack API.
    pub fn paystack(mut self) -> Self {
        self.paystack = true;
        self
    }

    /// Credits granted to new users.
    pub fn signup_credits(mut self, credits: i64) -> Self {
        self.signup_credits = Some(credits);
        self
    }

    /// Refund the job cost when dispatch fails.
    pub fn refund_on_dispatch_failure(mut self) -> Self {
        self.refund_on_dispatch_failure = true;
        self
    }

    /// Cap artifact downloads.
    pub fn max_artifact_bytes(mut self, limit: u64) -> Self {
        self.max_artifact_bytes = Some(limit);
        self
    }

    pub async fn build(self) -> TestHarness {
        let worker = if self.worker {
            Some(MockServer::start().await)
        } else {
            None
        };
        let paystack = if self.paystack {
            Some(MockServer::start().await)
        } else {
            None
        };

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            worker_url: self
                .worker_url
                .or_else(|| worker.as_ref().map(MockServer::uri)),
            worker_webhook_secret: Some(WORKER_SECRET.into()),
            callback_base_url: "http://genledger.test".into(),
            paystack_secret_key: Some(PAYSTACK_SECRET.into()),
            paystack_base_url: paystack
                .as_ref()
                .map_or_else(|| "http://127.0.0.1:1".into(), MockServer::uri),
            signup_credits: self.signup_credits.unwrap_or(100),
            refund_on_dispatch_failure: self.refund_on_dispatch_failure,
            request_timeout_seconds: 60,
            max_artifact_bytes: self
                .max_artifact_bytes
                .unwrap_or(ServiceConfig::default().max_artifact_bytes),
            ..ServiceConfig::default()
        };
        config.validate().expect("harness config must be valid");

        TestHarness::from_config(config, worker, paystack)
    }
}

impl TestHarness {
    /// A harness with no mock upstreams.
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    fn from_config(
        config: ServiceConfig,
        worker: Option<MockServer>,
        paystack: Option<MockServer>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let objects = Arc::new(MemoryObjectStore::new());

        let state = AppState::new(store.clone(), objects.clone(), config);
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        Self {
            server,
            store,
            objects,
            worker,
            paystack,
            subject: TEST_SUBJECT.to_string(),
        }
    }

    pub fn worker(&self) -> &MockServer {
        self.worker.as_ref().expect("harness built without a worker")
    }

    pub fn paystack(&self) -> &MockServer {
        self.paystack.as_ref().expect("harness built without Paystack")
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub fn get(&self, path: &str) -> TestRequest {
        as_user(self.server.get(path), &self.subject)
    }

    pub fn post(&self, path: &str) -> TestRequest {
        as_user(self.server.post(path), &self.subject)
    }

    pub fn put(&self, path: &str) -> TestRequest {
        as_user(self.server.put(path), &self.subject)
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        as_user(self.server.delete(path), &self.subject)
    }

    /// The test user, created on first authenticated request.
    pub async fn user(&self) -> User {
        self.get("/v1/credits/balance").await.assert_status_ok();
        self.store
            .get_user_by_external_id(&self.subject)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn balance(&self) -> i64 {
        let response = self.get("/v1/credits/balance").await;
        response.assert_status_ok();
        response.json::<Value>()["available"].as_i64().unwrap()
    }

    pub async fn transactions(&self) -> Vec<Value> {
        let response = self.get("/v1/credits/transactions").await;
        response.assert_status_ok();
        response.json::<Value>()["transactions"]
            .as_array()
            .unwrap()
            .clone()
    }

    pub async fn job(&self, job_id: &str) -> Value {
        let response = self.get(&format!("/v1/jobs/{job_id}")).await;
        response.assert_status_ok();
        response.json()
    }

    pub fn worker_callback(&self, kind: &str, body: &Value) -> TestRequest {
        signed(
            self.server.post(&format!("/webhooks/{kind}-completion")),
            "x-webhook-signature",
            WORKER_SECRET,
            body,
        )
    }

    pub fn paystack_webhook(&self, body: &Value) -> TestRequest {
        signed(
            self.server.post("/webhooks/paystack"),
            "x-paystack-signature",
            PAYSTACK_SECRET,
            body,
        )
    }

    // ========================================================================
    // Worker
    // ========================================================================

    /// Accept every dispatch.
    pub async fn accept_dispatch(&self) {
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"accepted": true})))
            .mount(self.worker())
            .await;
    }

    /// Create a job through the API and return its id.
    pub async fn create_job(&self, kind: &str, prompt: &str) -> String {
        let response = self
            .post("/v1/jobs")
            .json(&json!({ "kind": kind, "prompt": prompt }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["id"].as_str().unwrap().to_string()
    }
}

/// Attach a bearer token for `subject`.
pub fn as_user(request: TestRequest, subject: &str) -> TestRequest {
    let value = format!("Bearer {}", token_for(subject));
    request.add_header(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&value).unwrap(),
    )
}

/// Attach the admin key.
pub fn as_admin(request: TestRequest) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-admin-key"),
        HeaderValue::from_static(ADMIN_KEY),
    )
}

pub fn token_for(subject: &str) -> String {
    let claims = JwtClaims {
        sub: subject.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
        iss: None,
        aud: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Send `body` as raw JSON with an HMAC-SHA512 signature header.
pub fn signed(request: TestRequest, header: &'static str, secret: &str, body: &Value) -> TestRequest {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = hmac_sha512_hex(secret.as_bytes(), &bytes);
    request
        .add_header(
            HeaderName::from_static(header),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .content_type("application/json")
        .bytes(bytes.into())
}
