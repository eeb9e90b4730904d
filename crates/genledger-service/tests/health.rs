//! Health endpoint tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn test_health_check() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "genledger");
    assert_eq!(body["worker"], false);
    assert_eq!(body["payments"], true);
}

#[tokio::test]
async fn test_health_reports_worker() {
    let harness = TestHarness::builder().worker().build().await;

    let body: serde_json::Value = harness.server.get("/health").await.json();
    assert_eq!(body["worker"], true);
}
