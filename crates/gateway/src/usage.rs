use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// A finalised per-request accounting record, emitted exactly once per
/// request (including rejections) by the quota middleware.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub user: String,
    pub project: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: Option<String>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    In,
    Out,
}

/// Usage sink (C7). `record` must never block or fail the request path: the
/// metric variant is synchronous and cheap, the external variant dispatches
/// to its own task.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, event: UsageEvent);
}

pub struct NullUsageSink;

#[async_trait]
impl UsageSink for NullUsageSink {
    async fn record(&self, _event: UsageEvent) {}
}

/// Process-local labelled counter keyed by `(user, direction, model)`.
#[derive(Default)]
pub struct MetricUsageSink {
    counters: Mutex<HashMap<(String, Direction, String), u64>>,
}

impl MetricUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(String, String, String, u64)> {
        self.counters
            .lock()
            .iter()
            .map(|((user, dir, model), count)| {
                let dir = match dir {
                    Direction::In => "in",
                    Direction::Out => "out",
                };
                (user.clone(), dir.to_string(), model.clone(), *count)
            })
            .collect()
    }
}

#[async_trait]
impl UsageSink for MetricUsageSink {
    async fn record(&self, event: UsageEvent) {
        let model = event.model.clone().unwrap_or_default();
        let mut counters = self.counters.lock();
        *counters
            .entry((event.user.clone(), Direction::In, model.clone()))
            .or_insert(0) += event.tokens_in;
        *counters
            .entry((event.user, Direction::Out, model))
            .or_insert(0) += event.tokens_out;
    }
}

/// Posts a structured usage event to an external meter. Failures are logged
/// and swallowed; `record` spawns the POST so the caller never waits on it,
/// mirroring `OpenMeterBackend.record`.
pub struct ExternalUsageSink {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ExternalUsageSink {
    pub fn new(http: reqwest::Client, url: String, api_key: Option<String>) -> Self {
        Self { http, url, api_key }
    }
}

#[async_trait]
impl UsageSink for ExternalUsageSink {
    async fn record(&self, event: UsageEvent) {
        let http = self.http.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        tokio::spawn(async move {
            let mut req = http.post(&url).json(&event);
            if let Some(key) = api_key {
                req = req.bearer_auth(key);
            }
            if let Err(e) = req.send().await {
                tracing::warn!(error = %e, "usage event delivery failed, dropping");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, tin: u64, tout: u64) -> UsageEvent {
        UsageEvent {
            user: user.to_string(),
            project: None,
            tokens_in: tin,
            tokens_out: tout,
            model: Some("m".to_string()),
            request_id: "r1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn metric_sink_accumulates_by_direction() {
        let sink = MetricUsageSink::new();
        sink.record(event("u1", 3, 5)).await;
        sink.record(event("u1", 2, 0)).await;
        let snapshot = sink.snapshot();
        let in_total: u64 = snapshot
            .iter()
            .filter(|(u, d, _, _)| u == "u1" && d == "in")
            .map(|(_, _, _, c)| *c)
            .sum();
        assert_eq!(in_total, 5);
    }

    #[tokio::test]
    async fn null_sink_drops_silently() {
        NullUsageSink.record(event("u1", 1, 1)).await;
    }
}
