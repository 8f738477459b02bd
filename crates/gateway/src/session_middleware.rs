use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth_middleware::{is_public_path, AuthContext};
use crate::error::AppError;
use crate::session::{derive_session_id, truncated};

pub const SESSION_HEADER: &str = "x-attach-session";

/// Context attached to request extensions for downstream middlewares/routes.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub sid: String,
}

/// C4: requires `sub` from [`AuthContext`] (defensively 401 otherwise),
/// derives `sid = H(sub || ":" || ua)`, and sets the truncated session
/// header on the response.
pub async fn session_middleware(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    if req.method() == axum::http::Method::OPTIONS || is_public_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let auth = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or(AppError::Unauthenticated)?;

    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let sid = derive_session_id(&auth.sub, &user_agent);
    req.extensions_mut().insert(SessionContext { sid: sid.clone() });

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(truncated(&sid)) {
        resp.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(resp)
}
