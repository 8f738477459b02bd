mod common;

use std::time::Duration;

use attach_gateway::build_router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{mock_jwks_server, sign_jwt, test_state};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt as _;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// S5 — a forwarded task progresses `queued -> in_progress -> done` and the
/// result is retrievable by id; an unknown id is a 404.
#[tokio::test]
async fn async_task_lifecycle_reaches_done() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "forwarded"})))
        .mount(&engine)
        .await;

    let state = test_state(&jwks, &engine.uri()).await;
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let req = Request::post("/a2a/tasks/send")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"input": {"model": "m"}}).to_string()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["state"], json!("queued"));
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let mut final_state = String::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status_req = Request::get(format!("/a2a/tasks/status/{task_id}"))
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let status_resp = app.clone().oneshot(status_req).await.unwrap();
        assert_eq!(status_resp.status(), StatusCode::OK);
        let status_body = body_json(status_resp).await;
        final_state = status_body["state"].as_str().unwrap().to_string();
        if final_state == "done" || final_state == "error" {
            assert_eq!(final_state, "done");
            assert_eq!(status_body["result"], json!({"answer": "forwarded"}));
            return;
        }
    }
    panic!("task never reached a terminal state, last seen: {final_state}");
}

#[tokio::test]
async fn unknown_task_is_404() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    let state = test_state(&jwks, &engine.uri()).await;
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let req = Request::get("/a2a/tasks/status/does-not-exist")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
