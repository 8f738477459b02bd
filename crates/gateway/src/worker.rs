use crate::fingerprint::fingerprint;
use crate::state::AppState;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Background worker loop (C11): drain the job queue, call the upstream
/// engine, fill the cache. Failures are logged and the job dropped
/// (at-most-once fill); duplicate fills are safe because cache writes are
/// idempotent at the fingerprint level (last-writer-wins).
///
/// `shutdown` is cooperative: a queue `get()` in flight is allowed to finish
/// its current job, and the loop exits on the next iteration rather than
/// aborting mid-fill, the same pattern `ToolTimeoutManager` uses its
/// `CancellationToken` for.
pub async fn run(state: AppState, worker_id: usize, shutdown: CancellationToken) {
    loop {
        let job = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(worker_id, "shutdown requested, worker exiting");
                return;
            }
            job = state.queue.get() => job,
        };

        let job = match job {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "job queue closed, worker exiting");
                return;
            }
        };

        if let Err(e) = process_job(&state, &job).await {
            tracing::warn!(worker_id, job_id = %job.id, error = %e, "job processing failed, dropping");
        }
    }
}

async fn process_job(state: &AppState, job: &crate::queue::Job) -> anyhow::Result<()> {
    let model = job
        .request
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("job missing model"))?;
    let messages = job.request.get("messages").cloned().unwrap_or(json!([]));
    let params = job.request.get("params").cloned().unwrap_or(json!({}));
    let key = fingerprint(model, &messages, &params);

    let mut req = state
        .http
        .post(format!("{}/v1/chat/completions", state.config.engine_url))
        .json(&job.request)
        .timeout(state.config.engine_timeout);
    if let Some(auth) = job.headers.get("Authorization") {
        req = req.header(axum::http::header::AUTHORIZATION, auth);
    }

    let resp = req.send().await?.error_for_status()?;
    let value: serde_json::Value = resp.json().await?;
    state.cache.set(key, value).await?;
    Ok(())
}
