use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

/// `GET /auth/config` — unauthenticated bootstrap for clients.
pub async fn auth_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "domain": state.config.auth0_domain,
        "client_id": state.config.auth0_client,
        "audience": state.config.oidc_audience,
    }))
}

/// `GET /v1/metrics` — JSON snapshot of the metric usage sink, if enabled.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let counters: Vec<_> = state
        .metric_sink
        .as_ref()
        .map(|sink| sink.snapshot())
        .unwrap_or_default()
        .into_iter()
        .map(|(user, direction, model, count)| {
            json!({"user": user, "direction": direction, "model": model, "count": count})
        })
        .collect();
    Json(json!({"counters": counters}))
}

#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /v1/memory/query` — interface-only surface for the optional
/// persistent memory store collaborator (out of scope beyond readiness,
/// per spec §1/§6): `503 BackendUnready` until a real backend is wired in.
pub async fn memory_query(
    State(state): State<AppState>,
    Query(_params): Query<MemoryQuery>,
) -> Result<Response, AppError> {
    state.memory_backend.ensure_ready().await?;
    Ok(Json(json!({"results": []})).into_response())
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(json!({
        "openapi": "3.0.0",
        "info": {"title": "attach-gateway", "version": env!("CARGO_PKG_VERSION")},
        "paths": {}
    }))
}

pub async fn docs() -> impl IntoResponse {
    axum::response::Html("<!doctype html><title>attach-gateway docs</title><p>See /openapi.json.</p>")
}

pub async fn redoc() -> impl IntoResponse {
    axum::response::Html("<!doctype html><title>attach-gateway redoc</title><p>See /openapi.json.</p>")
}
