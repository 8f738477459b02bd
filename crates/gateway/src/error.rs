use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::json;

/// Closed error taxonomy for the request-processing pipeline.
///
/// Every variant maps to exactly one surface status code (spec §7); callers
/// convert internal failures (`anyhow::Error`) into one of these at the
/// handler boundary rather than letting error types leak across layers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("missing bearer token")]
    MissingBearer,
    #[error("alg not allowed")]
    AlgNotAllowed,
    #[error("kid missing from token header")]
    KidMissing,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token expired")]
    Expired,
    #[error("kid unknown to current jwks snapshot")]
    KidUnknown,
    #[error("issuer unknown")]
    IssuerUnknown,
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("malformed request body")]
    BadJson,
    #[error("token quota exceeded")]
    QuotaExceeded { retry_after: u64 },
    #[error("unknown task")]
    TaskUnknown,
    #[error("upstream error")]
    UpstreamStatus { status: StatusCode, body: Bytes },
    #[error("upstream io failure: {0}")]
    UpstreamIO(String),
    #[error("memory backend not ready")]
    BackendUnready,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::MissingBearer => {
                unauthorized("missing bearer token")
            }
            AppError::AlgNotAllowed => unauthorized("alg not allowed"),
            AppError::KidMissing => unauthorized("kid missing from token header"),
            AppError::Malformed(msg) => unauthorized(&format!("malformed token: {msg}")),
            AppError::Expired => unauthorized("token expired"),
            AppError::KidUnknown => unauthorized("kid unknown"),
            AppError::IssuerUnknown => unauthorized("issuer unknown"),
            AppError::ExchangeFailed(msg) => {
                unauthorized(&format!("token exchange failed: {msg}"))
            }
            AppError::Unauthenticated => unauthorized("unauthenticated"),
            AppError::BadJson => {
                (StatusCode::BAD_REQUEST, Json(json!({"detail": "malformed request body"})))
                    .into_response()
            }
            AppError::QuotaExceeded { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"detail": "token quota exceeded", "retry_after": retry_after})),
            )
                .into_response(),
            AppError::TaskUnknown => {
                (StatusCode::NOT_FOUND, Json(json!({"detail": "unknown task"}))).into_response()
            }
            AppError::UpstreamStatus { status, body } => {
                (status, body).into_response()
            }
            AppError::UpstreamIO(msg) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({"detail": format!("upstream io failure: {msg}")})),
            )
                .into_response(),
            AppError::BackendUnready => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"detail": "memory backend not ready"})),
            )
                .into_response(),
        }
    }
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail}))).into_response()
}
