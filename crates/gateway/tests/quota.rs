mod common;

use std::time::Duration;

use attach_gateway::build_router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{mock_jwks_server, sign_jwt, test_state_with_quota};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt as _;
use wiremock::MockServer;

/// S2 — a request whose body exceeds the configured per-minute budget is
/// rejected on ingress with 429 and a bounded `retry_after`.
#[tokio::test]
async fn quota_rejection_on_ingress() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    let state = test_state_with_quota(&jwks, &engine.uri(), 10).await;
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    // 20 bytes of textual body, well over the 10-token budget under the
    // byte-count fallback encoder path (the body is valid JSON so the BPE
    // encoder also applies, but either way it's over budget).
    let req = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from("{\"text\":\"aaaaaaaaaaaaaaaaaaaa\"}"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["detail"], json!("token quota exceeded"));
    let retry_after = body["retry_after"].as_u64().unwrap();
    assert!(retry_after <= 60);
}

/// Invariant 3 — independent users never share a sliding window: a second
/// user's request is metered on a fresh window even after the first user
/// already exhausted theirs.
#[tokio::test]
async fn quota_is_independent_per_user() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    let state = test_state_with_quota(&jwks, &engine.uri(), 10).await;
    let app = build_router(state);

    let token_a = sign_jwt("user-a", Duration::from_secs(300));
    let req_a = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token_a}"))
        .header("content-type", "application/json")
        .body(Body::from("{\"text\":\"aaaaaaaaaaaaaaaaaaaa\"}"))
        .unwrap();
    let resp_a = app.clone().oneshot(req_a).await.unwrap();
    assert_eq!(resp_a.status(), StatusCode::TOO_MANY_REQUESTS);

    let token_b = sign_jwt("user-b", Duration::from_secs(300));
    let req_b = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token_b}"))
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp_b = app.oneshot(req_b).await.unwrap();
    // Small body, malformed for chat (no `model`), but must get past quota
    // (400, not 429) proving user-b's window is unaffected by user-a.
    assert_eq!(resp_b.status(), StatusCode::BAD_REQUEST);
}
