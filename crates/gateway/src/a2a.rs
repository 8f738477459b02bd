use axum::extract::{Path, Request, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::time::Duration;

use crate::error::AppError;
use crate::session_middleware::SESSION_HEADER;
use crate::state::AppState;
use crate::tasks::TaskState;

const HOP_HEADER: &str = "x-attach-task-hop";
const MAX_HOPS: u8 = 8;

/// `POST /a2a/tasks/send` (C12): registers a task, schedules a background
/// forwarder and an eviction sweep, returns immediately with `queued`.
pub async fn send_task(State(state): State<AppState>, req: Request) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    let payload: serde_json::Value = serde_json::from_slice(&body_bytes).map_err(|_| AppError::BadJson)?;
    let input = payload.get("input").cloned().ok_or(AppError::BadJson)?;

    let task_id = state.tasks.create();

    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION).cloned();
    let session_header = parts.headers.get(SESSION_HEADER).cloned();
    let hops = parts
        .headers
        .get(HOP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(0);

    if hops < MAX_HOPS {
        tokio::spawn(forward_task(
            state.clone(),
            task_id.clone(),
            input,
            auth_header,
            session_header,
            hops,
        ));
    } else {
        tracing::warn!(task_id = %task_id, "max forwarding hops reached, marking task error");
        state.tasks.transition(
            &task_id,
            TaskState::Error,
            Some(json!({"detail": "max forwarding hops exceeded"})),
        );
    }

    tokio::spawn(evict_after_ttl(state.clone(), state.config.task_ttl_secs));

    Ok(Json(json!({"task_id": task_id, "state": "queued"})).into_response())
}

/// `GET /a2a/tasks/status/{id}` (C12): 404 if absent, else the current
/// record.
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    let record = state.tasks.get(&task_id).ok_or(AppError::TaskUnknown)?;
    Ok(Json(json!({
        "task_id": record.task_id,
        "state": record.state,
        "result": record.result,
        "created_at": record.created_at,
    }))
    .into_response())
}

async fn forward_task(
    state: AppState,
    task_id: String,
    input: serde_json::Value,
    auth_header: Option<HeaderValue>,
    session_header: Option<HeaderValue>,
    hops: u8,
) {
    state.tasks.transition(&task_id, TaskState::InProgress, None);

    let mut req = state
        .http
        .post(&state.config.task_default_target)
        .json(&input)
        .timeout(state.config.task_forward_timeout)
        .header(HOP_HEADER, (hops + 1).to_string());
    if let Some(auth) = &auth_header {
        if let Ok(v) = auth.to_str() {
            req = req.header(axum::http::header::AUTHORIZATION, v);
        }
    }
    if let Some(sid) = &session_header {
        if let Ok(v) = sid.to_str() {
            req = req.header(SESSION_HEADER, v);
        }
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
            Ok(value) => state.tasks.transition(&task_id, TaskState::Done, Some(value)),
            Err(e) => state.tasks.transition(
                &task_id,
                TaskState::Error,
                Some(json!({"detail": e.to_string()})),
            ),
        },
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            state.tasks.transition(
                &task_id,
                TaskState::Error,
                Some(json!({"detail": format!("upstream status {status}: {body}")})),
            );
        }
        Err(e) => {
            state.tasks.transition(
                &task_id,
                TaskState::Error,
                Some(json!({"detail": e.to_string()})),
            );
        }
    }
}

async fn evict_after_ttl(state: AppState, ttl_secs: u64) {
    tokio::time::sleep(Duration::from_secs(ttl_secs)).await;
    state.tasks.evict_expired();
}
