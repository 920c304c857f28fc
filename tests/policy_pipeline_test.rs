mod common;

use axum::http::StatusCode;
use common::{send_json, test_app};
use serde_json::json;

fn test_body(query: &str, role: &str) -> serde_json::Value {
    json!({
        "query": query,
        "user": {
            "id": "u-1",
            "email": "user@example.com",
            "role": role,
            "region": "us-east-1"
        }
    })
}

#[tokio::test]
async fn test_dry_run_reports_block_without_auditing() {
    let (app, ctx) = test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/policies/test",
        Some(test_body("DROP TABLE users", "agent")),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["blocked_by"], json!(["drop_table_prevention"]));

    // A dry run never writes audit rows or usage
    assert!(ctx.stores.audit.list_audits(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_reports_dlp_detections() {
    let (app, _ctx) = test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/policies/test",
        Some(test_body("email jane.doe@example.com about her card", "agent")),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["redaction_required"], true);
    let violations = body["violations"].as_array().unwrap();
    assert!(violations.iter().any(|v| v["type"] == "dlp_detection"));
}

#[tokio::test]
async fn test_admin_may_test_as_another_user() {
    let (app, _ctx) = test_app();

    // Admin supplies a test_user; evaluation runs against that user
    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/policies/test",
        Some(json!({
            "query": "show open tickets",
            "user": {
                "id": "admin-1",
                "email": "admin@example.com",
                "role": "admin"
            },
            "test_user": {
                "id": "u-2",
                "email": "agent@example.com",
                "role": "agent"
            }
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
async fn test_non_admin_test_user_is_ignored() {
    let (app, _ctx) = test_app();

    // A non-admin cannot evaluate as someone else; the call still
    // succeeds against the caller's own identity
    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/policies/test",
        Some(json!({
            "query": "show open tickets",
            "user": {
                "id": "u-1",
                "email": "agent@example.com",
                "role": "agent"
            },
            "test_user": {
                "id": "u-2",
                "email": "other@example.com",
                "role": "admin"
            }
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let (app, _ctx) = test_app();

    let (status, body) = send_json(&app, "GET", "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
