mod common;

use std::time::Duration;

use attach_gateway::build_router;
use attach_gateway::cache::ResponseCache as _;
use attach_gateway::fingerprint::fingerprint;
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

/// S1 — a cached response is served verbatim with no upstream call, and the
/// session header is present on the response.
#[tokio::test]
async fn cached_chat_returns_without_upstream_call() {
    let jwks = mock_jwks_server().await;
    // No mock mounted on this server for chat completions: if the gateway
    // ever called upstream the test would fail with a connection error.
    let engine = MockServer::start().await;
    let state = test_state(&jwks, &engine.uri()).await;

    let messages = json!([{"role": "user", "content": "hi"}]);
    let params = json!({"t": 0.1});
    let key = fingerprint("m", &messages, &params);
    state.cache.set(key, json!({"answer": "ok"})).await.unwrap();

    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let req = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "m", "messages": messages, "params": params}).to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-attach-session"));
    let body = body_json(resp).await;
    assert_eq!(body, json!({"answer": "ok"}));
}

#[tokio::test]
async fn missing_bearer_returns_401() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    let state = test_state(&jwks, &engine.uri()).await;
    let app = build_router(state);

    let req = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"model": "m"}).to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_returns_400() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    let state = test_state(&jwks, &engine.uri()).await;
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let req = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

/// S1 variant — on a cache miss, a non-streaming request is buffered from
/// upstream and the response is written into the cache (invariant 6).
#[tokio::test]
async fn non_streaming_miss_calls_upstream_and_populates_cache() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "fresh"})))
        .mount(&engine)
        .await;

    let state = test_state(&jwks, &engine.uri()).await;
    let cache = state.cache.clone();
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let messages = json!([{"role": "user", "content": "hi"}]);
    let params = json!({});
    let req = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": "m2", "messages": messages, "params": params}).to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body, json!({"answer": "fresh"}));

    let key = fingerprint("m2", &messages, &params);
    assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"answer": "fresh"})));
}
