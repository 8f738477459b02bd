use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde_json::json;

use crate::error::AppError;
use crate::fingerprint::fingerprint;
use crate::queue::Job;
use crate::state::AppState;

/// `POST /api/chat` (C10): cache lookup, then either enqueue (shared queue
/// backend) or forward to the upstream engine, streaming or buffered
/// depending on the request's `stream` flag.
pub async fn chat_handler(State(state): State<AppState>, req: Request<Body>) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?;

    let payload: serde_json::Value = serde_json::from_slice(&body_bytes).map_err(|_| AppError::BadJson)?;

    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or(AppError::BadJson)?;
    let messages = payload.get("messages").cloned().unwrap_or(json!([]));
    let params = payload.get("params").cloned().unwrap_or(json!({}));
    let streaming = payload.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    let key = fingerprint(model, &messages, &params);

    if let Some(hit) = state
        .cache
        .get(&key)
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?
    {
        return Ok(Json(hit).into_response());
    }

    if state.config.queue_backend == crate::config::Backend::Shared {
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut headers = std::collections::HashMap::new();
        if let Some(auth) = parts.headers.get(axum::http::header::AUTHORIZATION) {
            if let Ok(v) = auth.to_str() {
                headers.insert("Authorization".to_string(), v.to_string());
            }
        }
        state
            .queue
            .put(Job {
                id: job_id.clone(),
                request: payload,
                headers,
            })
            .await
            .map_err(|e| AppError::UpstreamIO(e.to_string()))?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({"job_id": job_id, "status": "queued"})),
        )
            .into_response());
    }

    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION).cloned();

    if streaming {
        stream_from_engine(&state, &payload, auth_header).await
    } else {
        call_engine_buffered(&state, &payload, auth_header, key).await
    }
}

async fn call_engine_buffered(
    state: &AppState,
    payload: &serde_json::Value,
    auth_header: Option<HeaderValue>,
    key: String,
) -> Result<Response, AppError> {
    let mut req = state
        .http
        .post(format!("{}/v1/chat/completions", state.config.engine_url))
        .json(payload)
        .timeout(state.config.engine_timeout);
    if let Some(auth) = &auth_header {
        if let Ok(v) = auth.to_str() {
            req = req.header(axum::http::header::AUTHORIZATION, v);
        }
    }

    let resp = req.send().await.map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    let status = resp.status();
    let body_bytes = resp.bytes().await.map_err(|e| AppError::UpstreamIO(e.to_string()))?;

    if !status.is_success() {
        return Err(AppError::UpstreamStatus {
            status,
            body: body_bytes,
        });
    }

    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes).map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    state
        .cache
        .set(key, value.clone())
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    Ok(Json(value).into_response())
}

/// Relays upstream bytes as they arrive without buffering; the streamed
/// response is never cached (spec.md's stated resolution of the streaming
/// cache-population open question).
async fn stream_from_engine(
    state: &AppState,
    payload: &serde_json::Value,
    auth_header: Option<HeaderValue>,
) -> Result<Response, AppError> {
    let mut req = state
        .http
        .post(format!("{}/v1/chat/completions", state.config.engine_url))
        .json(payload);
    if let Some(auth) = &auth_header {
        if let Ok(v) = auth.to_str() {
            req = req.header(axum::http::header::AUTHORIZATION, v);
        }
    }

    let resp = req.send().await.map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await.unwrap_or_default();
        return Err(AppError::UpstreamStatus { status, body });
    }

    let upstream_stream = resp
        .bytes_stream()
        .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())));
    let body = Body::from_stream(upstream_stream);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}
