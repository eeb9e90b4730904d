//! Job creation, dispatch and polling tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{as_user, TestHarness};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use genledger_core::{JobKind, JobSpec, JobStatus, User};
use genledger_service::{jobs, AppState, MemoryObjectStore, ServiceConfig};
use genledger_store::{MemoryStore, Store};

#[tokio::test]
async fn test_create_job_deducts_and_dispatches() {
    let harness = TestHarness::builder().worker().build().await;

    Mock::given(method("POST"))
        .and(path("/jobs"))
        .and(body_partial_json(json!({
            "kind": "image",
            "spec": { "prompt": "a lighthouse at dusk", "quantity": 2 },
            "callback_url": "http://genledger.test/webhooks/image-completion"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(harness.worker())
        .await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "image", "prompt": "a lighthouse at dusk", "quantity": 2 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "INITIALIZING");
    assert_eq!(body["kind"], "image");
    assert_eq!(body["cost"], 20);

    assert_eq!(harness.balance().await, 80);
    let transactions = harness.transactions().await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["transaction_type"], "USAGE");
    assert_eq!(transactions[0]["amount"], -20);
    assert_eq!(transactions[0]["metadata"]["job_id"], body["id"]);
}

#[tokio::test]
async fn test_insufficient_credits_creates_nothing() {
    let harness = TestHarness::builder().worker().signup_credits(5).build().await;

    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(harness.worker())
        .await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "image", "prompt": "too expensive" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["available"], 5);
    assert_eq!(body["error"]["details"]["required"], 10);

    let jobs: serde_json::Value = harness.get("/v1/jobs").await.json();
    assert!(jobs["jobs"].as_array().unwrap().is_empty());
    assert_eq!(harness.balance().await, 5);
}

#[tokio::test]
async fn test_invalid_spec_is_rejected_before_charging() {
    let harness = TestHarness::builder().worker().build().await;

    for body in [
        json!({ "kind": "blog", "prompt": "   " }),
        json!({ "kind": "blog", "prompt": "ok", "quantity": 0 }),
        json!({ "kind": "blog", "prompt": "ok", "quantity": 21 }),
    ] {
        let response = harness.post("/v1/jobs").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    assert_eq!(harness.balance().await, 100);
}

#[tokio::test]
async fn test_unknown_kind_is_rejected() {
    let harness = TestHarness::builder().worker().build().await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "podcast", "prompt": "hello" }))
        .await;

    assert!(response.status_code().is_client_error());
    assert_eq!(harness.balance().await, 100);
}

#[tokio::test]
async fn test_no_worker_configured() {
    let harness = TestHarness::new().await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "image", "prompt": "a fox" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(harness.balance().await, 100);
}

#[tokio::test]
async fn test_worker_rejection_fails_job_without_refund() {
    let harness = TestHarness::builder()
        .worker()
        .signup_credits(500)
        .build()
        .await;

    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model offline"))
        .mount(harness.worker())
        .await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "book", "prompt": "a saga", "quantity": 5 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "upstream_rejected");
    let job_id = body["error"]["details"]["job_id"].as_str().unwrap().to_string();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert!(job["error"]
        .as_str()
        .unwrap()
        .starts_with("Dispatch failed"));

    assert_eq!(harness.balance().await, 0);
}

#[tokio::test]
async fn test_unreachable_worker_refunds_when_configured() {
    let harness = TestHarness::builder()
        .worker_url("http://127.0.0.1:1")
        .signup_credits(500)
        .refund_on_dispatch_failure()
        .build()
        .await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "book", "prompt": "a saga", "quantity": 5 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert!(body["error"]["details"]["job_id"].is_string());

    assert_eq!(harness.balance().await, 500);
    let transactions = harness.transactions().await;
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["transaction_type"], "REFUND");
    assert_eq!(transactions[0]["amount"], 500);
}

#[tokio::test]
async fn test_unreachable_worker_fails_job_without_refund_by_default() {
    let harness = TestHarness::builder()
        .worker_url("http://127.0.0.1:1")
        .signup_credits(500)
        .build()
        .await;

    let response = harness
        .post("/v1/jobs")
        .json(&json!({ "kind": "book", "prompt": "a saga", "quantity": 5 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "upstream_unavailable");
    let job_id = body["error"]["details"]["job_id"].as_str().unwrap().to_string();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert!(job["error"]
        .as_str()
        .unwrap()
        .starts_with("Dispatch failed"));

    assert_eq!(harness.balance().await, 0);
    let transactions = harness.transactions().await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["transaction_type"], "USAGE");
}

#[tokio::test]
async fn test_abandoned_request_still_dispatches_charged_job() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&worker)
        .await;

    let store = Arc::new(MemoryStore::new());
    let config = ServiceConfig {
        worker_url: Some(worker.uri()),
        ..ServiceConfig::default()
    };
    let state = Arc::new(AppState::new(
        store.clone(),
        Arc::new(MemoryObjectStore::new()),
        config,
    ));
    let author = store.insert_user(&User::new("user_abandon", 500)).await.unwrap();

    // The caller gives up while the worker is still answering.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        jobs::create_job(&state, &author, JobKind::Image, JobSpec::new("a lighthouse")),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(1000)).await;

    let jobs = store.list_jobs_by_author(&author.id, 10, 0).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Processing);
    let balance = store.get_user(&author.id).await.unwrap().unwrap().credits;
    assert_eq!(balance, 490);
}

#[tokio::test]
async fn test_get_job_polls_worker() {
    let harness = TestHarness::builder().worker().build().await;
    harness.accept_dispatch().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/jobs/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "generating",
            "progress": 40,
            "message": "rendering"
        })))
        .mount(harness.worker())
        .await;

    let job_id = harness.create_job("video", "waves").await;
    let job = harness.job(&job_id).await;

    assert_eq!(job["status"], "GENERATING");
    assert_eq!(job["progress"], 40);
    assert_eq!(job["message"], "rendering");
    assert_eq!(job["files"], json!([]));
}

#[tokio::test]
async fn test_get_job_falls_back_when_poll_fails() {
    let harness = TestHarness::builder().worker().build().await;
    harness.accept_dispatch().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/jobs/.+$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(harness.worker())
        .await;

    let job_id = harness.create_job("image", "a fox").await;
    let job = harness.job(&job_id).await;

    assert_eq!(job["status"], "INITIALIZING");
    assert_eq!(job["legacy_status"], "processing");
}

#[tokio::test]
async fn test_jobs_are_private() {
    let harness = TestHarness::builder().worker().build().await;
    harness.accept_dispatch().await;

    let job_id = harness.create_job("image", "a fox").await;

    let response = as_user(harness.server.get(&format!("/v1/jobs/{job_id}")), "user_other").await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let others: serde_json::Value = as_user(harness.server.get("/v1/jobs"), "user_other")
        .await
        .json();
    assert!(others["jobs"].as_array().unwrap().is_empty());

    let mine: serde_json::Value = harness.get("/v1/jobs").await.json();
    assert_eq!(mine["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = TestHarness::builder().worker().build().await;

    harness
        .get(&format!("/v1/jobs/{}", genledger_core::JobId::generate()))
        .await
        .assert_status_not_found();
}
