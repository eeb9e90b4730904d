//! Worker callback and generated file tests.

mod common;

use axum::http::StatusCode;
use common::{as_user, signed, TestHarness};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use genledger_core::{JobId, StorageKey};
use genledger_service::jobs::FAILURE_FALLBACK;
use genledger_service::ObjectStore;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake image body";

async fn harness_with_job(kind: &str) -> (TestHarness, String) {
    let harness = TestHarness::builder().worker().build().await;
    harness.accept_dispatch().await;
    let job_id = harness.create_job(kind, "a lighthouse").await;
    (harness, job_id)
}

async fn serve_artifact(harness: &TestHarness) -> String {
    Mock::given(method("GET"))
        .and(path("/artifacts/out.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .mount(harness.worker())
        .await;
    format!("{}/artifacts/out.png", harness.worker().uri())
}

#[tokio::test]
async fn test_completion_downloads_artifacts() {
    let (harness, job_id) = harness_with_job("image").await;
    let url = serve_artifact(&harness).await;

    let response = harness
        .worker_callback(
            "image",
            &json!({
                "job_id": job_id,
                "status": "completed",
                "message": "done",
                "result": { "files": [{ "url": url, "format": "PNG", "width": 512, "height": 512 }] }
            }),
        )
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "COMPLETED");
    assert_eq!(job["progress"], 100);
    let files = job["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["format"], "png");
    assert_eq!(files[0]["width"], 512);
    assert_eq!(files[0]["size_bytes"], PNG_BYTES.len());

    let user = harness.user().await;
    let key = StorageKey::new(user.id, genledger_core::JobKind::Image, job_id.clone(), "0.png").unwrap();
    assert_eq!(files[0]["storage_key"], key.to_string());
    assert_eq!(harness.objects.get(&key).await.unwrap().as_ref(), PNG_BYTES);
}

#[tokio::test]
async fn test_oversized_artifact_is_refused() {
    let harness = TestHarness::builder()
        .worker()
        .max_artifact_bytes(8)
        .build()
        .await;
    harness.accept_dispatch().await;
    let job_id = harness.create_job("image", "a lighthouse").await;
    let url = serve_artifact(&harness).await;

    let response = harness
        .worker_callback(
            "image",
            &json!({
                "job_id": job_id,
                "status": "completed",
                "result": { "files": [{ "url": url }] }
            }),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("exceeds 8 bytes"));

    let job = harness.job(&job_id).await;
    assert_ne!(job["status"], "COMPLETED");

    let user = harness.user().await;
    let key = StorageKey::new(user.id, genledger_core::JobKind::Image, job_id.clone(), "0.png").unwrap();
    assert!(harness.objects.get(&key).await.is_err());
}

#[tokio::test]
async fn test_duplicate_completion_is_acknowledged_once() {
    let (harness, job_id) = harness_with_job("image").await;
    let url = serve_artifact(&harness).await;
    let callback = json!({
        "job_id": job_id,
        "status": "completed",
        "result": { "files": [{ "url": url }] }
    });

    harness.worker_callback("image", &callback).await.assert_status_ok();

    let again = harness.worker_callback("image", &callback).await;
    again.assert_status_ok();
    let body: serde_json::Value = again.json();
    assert_eq!(body["duplicate"], true);

    let job = harness.job(&job_id).await;
    assert_eq!(job["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let (harness, job_id) = harness_with_job("image").await;
    let callback = json!({ "job_id": job_id, "status": "failed", "error": "boom" });

    let forged = signed(
        harness.server.post("/webhooks/image-completion"),
        "x-webhook-signature",
        "not-the-secret",
        &callback,
    )
    .await;
    forged.assert_status_unauthorized();

    let unsigned = harness
        .server
        .post("/webhooks/image-completion")
        .json(&callback)
        .await;
    unsigned.assert_status_unauthorized();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "INITIALIZING");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = TestHarness::builder().worker().build().await;

    let response = harness
        .worker_callback(
            "image",
            &json!({ "job_id": JobId::generate(), "status": "completed" }),
        )
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn test_callback_for_wrong_kind_is_rejected() {
    let (harness, job_id) = harness_with_job("image").await;

    let response = harness
        .worker_callback("video", &json!({ "job_id": job_id, "status": "failed" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.job(&job_id).await["status"], "INITIALIZING");
}

#[tokio::test]
async fn test_progress_after_failure_is_ignored() {
    let (harness, job_id) = harness_with_job("video").await;

    harness
        .worker_callback("video", &json!({ "job_id": job_id, "status": "failed" }))
        .await
        .assert_status_ok();

    let late = harness
        .worker_callback(
            "video",
            &json!({ "job_id": job_id, "status": "processing", "progress": 30 }),
        )
        .await;
    late.assert_status_ok();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert_eq!(job["error"], FAILURE_FALLBACK);
    // No refund on worker failure.
    assert_eq!(harness.balance().await, 50);
}

#[tokio::test]
async fn test_progress_updates_are_clamped() {
    let (harness, job_id) = harness_with_job("blog").await;

    harness
        .worker_callback(
            "blog",
            &json!({ "job_id": job_id, "status": "generating", "progress": 250.0 }),
        )
        .await
        .assert_status_ok();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "GENERATING");
    assert_eq!(job["progress"], 100);
}

#[tokio::test]
async fn test_foreign_storage_key_is_refused_then_retry_succeeds() {
    let (harness, job_id) = harness_with_job("image").await;
    let user = harness.user().await;

    let stranger = genledger_core::UserId::generate();
    let foreign = StorageKey::new(stranger, genledger_core::JobKind::Image, "x", "0.png").unwrap();
    let response = harness
        .worker_callback(
            "image",
            &json!({
                "job_id": job_id,
                "status": "completed",
                "result": { "files": [{ "storage_key": foreign.to_string() }] }
            }),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let own = StorageKey::new(user.id, genledger_core::JobKind::Image, job_id.clone(), "0.png").unwrap();
    harness
        .worker_callback(
            "image",
            &json!({
                "job_id": job_id,
                "status": "completed",
                "result": { "files": [{ "storage_key": own.to_string(), "size_bytes": 42 }] }
            }),
        )
        .await
        .assert_status_ok();

    let job = harness.job(&job_id).await;
    assert_eq!(job["status"], "COMPLETED");
    assert_eq!(job["files"][0]["size_bytes"], 42);
}

#[tokio::test]
async fn test_files_are_presigned_listed_and_deleted() {
    let (harness, job_id) = harness_with_job("image").await;
    let url = serve_artifact(&harness).await;
    harness
        .worker_callback(
            "image",
            &json!({ "job_id": job_id, "status": "completed", "result": { "files": [{ "url": url }] } }),
        )
        .await
        .assert_status_ok();

    let job = harness.job(&job_id).await;
    let file_id = job["files"][0]["id"].as_str().unwrap().to_string();
    let key = job["files"][0]["storage_key"].as_str().unwrap().to_string();

    let file: serde_json::Value = harness.get(&format!("/v1/files/{file_id}")).await.json();
    assert!(file["url"].as_str().unwrap().starts_with(&format!("memory://{key}")));

    let listed: serde_json::Value = harness.get("/v1/storage/objects").await.json();
    assert_eq!(listed["keys"], json!([key]));

    let stranger = as_user(harness.server.delete(&format!("/v1/files/{file_id}")), "user_other").await;
    assert_eq!(stranger.status_code(), StatusCode::FORBIDDEN);

    let deleted: serde_json::Value = harness.delete(&format!("/v1/files/{file_id}")).await.json();
    assert_eq!(deleted["deleted"], true);

    harness
        .get(&format!("/v1/files/{file_id}"))
        .await
        .assert_status_not_found();
    let listed: serde_json::Value = harness.get("/v1/storage/objects").await.json();
    assert_eq!(listed["keys"], json!([]));
}
