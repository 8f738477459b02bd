use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;

use crate::auth_middleware::{is_public_path, AuthContext};
use crate::error::AppError;
use crate::meter::now_secs;
use crate::state::AppState;
use crate::token_encoder::is_textual_content_type;
use crate::usage::UsageEvent;

/// Monitoring path prefixes that never pass through metering (C6), ported
/// from `_is_monitoring_endpoint` (which matches `/mem/events` by prefix,
/// not exact equality). Overlaps partially with [`is_public_path`]:
/// `/auth/config` skips both auth and quota, `/v1/metrics` and the memory
/// query surface are authenticated but still exempt from metering.
pub const MONITORING_PATH_PREFIXES: &[&str] = &["/v1/metrics", "/auth/config", "/v1/memory"];

fn is_monitoring_path(path: &str) -> bool {
    MONITORING_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

#[derive(Debug, Clone)]
struct UsageDraft {
    user: String,
    project: Option<String>,
    tokens_in: u64,
    tokens_out: u64,
    model: Option<String>,
    request_id: String,
}

async fn finalize_and_emit(state: &AppState, draft: UsageDraft) {
    state
        .usage
        .record(UsageEvent {
            user: draft.user,
            project: draft.project,
            tokens_in: draft.tokens_in,
            tokens_out: draft.tokens_out,
            model: draft.model,
            request_id: draft.request_id,
            timestamp: chrono::Utc::now(),
        })
        .await;
}

fn retry_after(window_secs: u64, oldest: f64) -> u64 {
    ((window_secs as f64) - (now_secs() - oldest)).max(0.0) as u64
}

/// C6: meters ingress (request body) and egress (streaming response body)
/// token counts against the per-user sliding window, rejecting with 429 when
/// either phase would push the window total past the limit. The request
/// body is read exactly once here and re-materialised for the downstream
/// dispatcher.
pub async fn quota_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();
    if req.method() == Method::OPTIONS || is_public_path(&path) || is_monitoring_path(&path) {
        return Ok(next.run(req).await);
    }

    let (parts, body) = req.into_parts();

    let user = parts
        .headers
        .get("x-attach-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.extensions.get::<AuthContext>().map(|a| a.sub.clone()))
        .unwrap_or_else(|| "anonymous".to_string());
    let project = parts
        .headers
        .get("x-attach-project")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let req_content_type = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_bytes = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?;

    let t_in = if is_textual_content_type(req_content_type.as_deref()) {
        state.encoder.count(&String::from_utf8_lossy(&body_bytes))
    } else {
        0
    };

    let mut draft = UsageDraft {
        user: user.clone(),
        project,
        tokens_in: t_in,
        tokens_out: 0,
        model: None,
        request_id,
    };

    let (total, oldest) = state
        .meter
        .increment(&user, t_in)
        .await
        .map_err(|e| AppError::UpstreamIO(e.to_string()))?;
    if total > state.config.max_tokens_per_min {
        let retry_after = retry_after(state.config.quota_window_secs, oldest);
        finalize_and_emit(&state, draft).await;
        return Err(AppError::QuotaExceeded { retry_after });
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(req).await;

    let (resp_parts, resp_body) = response.into_parts();
    draft.model = resp_parts
        .headers
        .get("x-llm-model")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let resp_textual = is_textual_content_type(
        resp_parts
            .headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );

    let mut stream = resp_body.into_data_stream();
    let max_tokens = state.config.max_tokens_per_min;

    match stream.next().await {
        None => {
            finalize_and_emit(&state, draft).await;
            Ok(Response::from_parts(resp_parts, Body::empty()))
        }
        Some(Err(e)) => Err(AppError::UpstreamIO(e.to_string())),
        Some(Ok(first_chunk)) => {
            let tokens = if resp_textual {
                state.encoder.count(&String::from_utf8_lossy(&first_chunk))
            } else {
                0
            };
            let (total, oldest) = state
                .meter
                .increment(&user, tokens)
                .await
                .map_err(|e| AppError::UpstreamIO(e.to_string()))?;
            draft.tokens_out += tokens;
            if total > max_tokens {
                let retry_after = retry_after(state.config.quota_window_secs, oldest);
                finalize_and_emit(&state, draft).await;
                return Err(AppError::QuotaExceeded { retry_after });
            }

            let acc = StreamAcc {
                inner: stream,
                state: state.clone(),
                user,
                draft,
                textual: resp_textual,
                max_tokens,
                done: false,
            };
            let rest = futures::stream::unfold(acc, stream_with_quota_step);
            let first = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(first_chunk) });
            let body = Body::from_stream(first.chain(rest));
            Ok(Response::from_parts(resp_parts, body))
        }
    }
}

struct StreamAcc {
    inner: axum::body::BodyDataStream,
    state: AppState,
    user: String,
    draft: UsageDraft,
    textual: bool,
    max_tokens: u64,
    done: bool,
}

/// Per-chunk egress step: count tokens if textual, `store.increment`, and
/// truncate the stream cleanly (stop yielding, without an error) on overflow
/// rather than tearing the connection down mid-chunk.
async fn stream_with_quota_step(
    mut acc: StreamAcc,
) -> Option<(Result<Bytes, std::io::Error>, StreamAcc)> {
    if acc.done {
        return None;
    }
    match acc.inner.next().await {
        None => {
            let draft = acc.draft.clone();
            finalize_and_emit(&acc.state, draft).await;
            acc.done = true;
            None
        }
        Some(Err(_)) => {
            let draft = acc.draft.clone();
            finalize_and_emit(&acc.state, draft).await;
            acc.done = true;
            None
        }
        Some(Ok(chunk)) => {
            let tokens = if acc.textual {
                acc.state.encoder.count(&String::from_utf8_lossy(&chunk))
            } else {
                0
            };
            let incremented = acc.state.meter.increment(&acc.user, tokens).await;
            match incremented {
                Ok((total, _)) => {
                    acc.draft.tokens_out += tokens;
                    if total > acc.max_tokens {
                        let draft = acc.draft.clone();
                        finalize_and_emit(&acc.state, draft).await;
                        acc.done = true;
                        return None;
                    }
                    Some((Ok(chunk), acc))
                }
                Err(_) => {
                    let draft = acc.draft.clone();
                    finalize_and_emit(&acc.state, draft).await;
                    acc.done = true;
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitoring_paths_exempt_from_metering() {
        assert!(is_monitoring_path("/v1/metrics"));
        assert!(is_monitoring_path("/auth/config"));
        assert!(is_monitoring_path("/v1/memory/query"));
        assert!(!is_monitoring_path("/api/chat"));
    }

    #[test]
    fn retry_after_is_bounded_by_window() {
        let now = now_secs();
        let r = retry_after(60, now);
        assert!(r <= 60);
    }
}
