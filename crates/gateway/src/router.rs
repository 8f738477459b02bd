use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::a2a::{send_task, task_status};
use crate::auth_middleware::auth_middleware;
use crate::proxy::chat_handler;
use crate::quota::quota_middleware;
use crate::routes::{auth_config, docs, memory_query, metrics, openapi_json, redoc};
use crate::session_middleware::session_middleware;
use crate::state::AppState;

/// Mounts C3 → C4 → C6 in order and every route in the external interface
/// table, with CORS as the outermost layer.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/a2a/tasks/send", post(send_task))
        .route("/a2a/tasks/status/{id}", get(task_status))
        .route("/v1/metrics", get(metrics))
        .route("/v1/memory/query", get(memory_query))
        .layer(middleware::from_fn_with_state(state.clone(), quota_middleware))
        .layer(middleware::from_fn(session_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/auth/config", get(auth_config))
        .route("/docs", get(docs))
        .route("/redoc", get(redoc))
        .route("/openapi.json", get(openapi_json))
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    // `allow_credentials(true)` and a wildcard origin/header set are mutually
    // exclusive per the CORS spec (browsers reject the combination); an
    // explicit allow-list gets both, an empty one falls back to wildcard
    // without credentials.
    let origins = &state.config.cors_allowed_origins;
    let credentialed = !origins.is_empty();

    let allow_origin = if credentialed {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        AllowOrigin::list(values)
    } else {
        AllowOrigin::any()
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(credentialed)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]);

    if credentialed {
        layer.allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("x-attach-user"),
            HeaderName::from_static("x-attach-project"),
            HeaderName::from_static("x-request-id"),
        ])
    } else {
        layer.allow_headers(tower_http::cors::Any)
    }
}
