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

/// S3 — bytes from a chunked upstream response are relayed to the client in
/// order, with the full concatenated body intact.
#[tokio::test]
async fn streaming_proxy_preserves_byte_order() {
    let jwks = mock_jwks_server().await;
    let engine = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("abc", "text/event-stream"),
        )
        .mount(&engine)
        .await;

    let state = test_state(&jwks, &engine.uri()).await;
    let app = build_router(state);
    let token = sign_jwt("user-1", Duration::from_secs(300));

    let req = Request::post("/api/chat")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "params": {},
                "stream": true,
            })
            .to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"abc");
}
