use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Sliding-window per-user token meter (C5). `increment` appends `(now,
/// tokens)`, evicts samples older than `window_secs`, and returns the
/// retained total plus the oldest retained timestamp (or `now` if the window
/// is empty after eviction).
#[async_trait]
pub trait MeterStore: Send + Sync {
    async fn increment(&self, user: &str, tokens: u64) -> anyhow::Result<(u64, f64)>;
}

pub struct InMemoryMeterStore {
    window_secs: f64,
    windows: RwLock<HashMap<String, VecDeque<(f64, u64)>>>,
}

impl InMemoryMeterStore {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: window_secs as f64,
            windows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MeterStore for InMemoryMeterStore {
    async fn increment(&self, user: &str, tokens: u64) -> anyhow::Result<(u64, f64)> {
        let now = now_secs();
        let cutoff = now - self.window_secs;
        let mut windows = self.windows.write();
        let deque = windows.entry(user.to_string()).or_default();
        if tokens > 0 {
            deque.push_back((now, tokens));
        }
        while let Some(&(ts, _)) = deque.front() {
            if ts < cutoff {
                deque.pop_front();
            } else {
                break;
            }
        }
        let total: u64 = deque.iter().map(|(_, t)| t).sum();
        let oldest = deque.front().map(|(ts, _)| *ts).unwrap_or(now);
        Ok((total, oldest))
    }
}

pub struct RedisMeterStore {
    conn: redis::aio::ConnectionManager,
    window_secs: f64,
}

impl RedisMeterStore {
    pub async fn connect(redis_url: &str, window_secs: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            window_secs: window_secs as f64,
        })
    }

    fn key(user: &str) -> String {
        format!("attach:meter:{user}")
    }
}

#[async_trait]
impl MeterStore for RedisMeterStore {
    /// `ZADD; ZREMRANGEBYSCORE to now-W; ZRANGE WITHSCORES` as a single
    /// pipelined round trip, mirroring `RedisMeterStore` in the Python
    /// implementation this was distilled from.
    async fn increment(&self, user: &str, tokens: u64) -> anyhow::Result<(u64, f64)> {
        use redis::AsyncCommands as _;

        let key = Self::key(user);
        let now = now_secs();
        let cutoff = now - self.window_secs;
        let member = format!("{now}:{tokens}");

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if tokens > 0 {
            pipe.cmd("ZADD").arg(&key).arg(now).arg(&member).ignore();
        }
        pipe.cmd("ZREMRANGEBYSCORE").arg(&key).arg(0).arg(cutoff).ignore();
        pipe.cmd("ZRANGE").arg(&key).arg(0).arg(-1).arg("WITHSCORES");

        let members: Vec<(String, f64)> = pipe.query_async(&mut conn).await?;

        let mut total: u64 = 0;
        let mut oldest = now;
        for (member, score) in &members {
            if let Some((_, tok_str)) = member.rsplit_once(':') {
                total += tok_str.parse::<u64>().unwrap_or(0);
            }
            if *score < oldest {
                oldest = *score;
            }
        }
        if members.is_empty() {
            oldest = now;
        }

        let _: () = conn.expire(&key, self.window_secs as i64 + 1).await?;

        Ok((total, oldest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sums_within_window_and_evicts() {
        let store = InMemoryMeterStore::new(60);
        let (total, _) = store.increment("u1", 10).await.unwrap();
        assert_eq!(total, 10);
        let (total, _) = store.increment("u1", 5).await.unwrap();
        assert_eq!(total, 15);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let store = InMemoryMeterStore::new(60);
        store.increment("a", 10).await.unwrap();
        let (total, _) = store.increment("b", 3).await.unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn pure_read_after_trim_with_zero_tokens() {
        let store = InMemoryMeterStore::new(60);
        store.increment("u1", 10).await.unwrap();
        let (total, oldest) = store.increment("u1", 0).await.unwrap();
        assert_eq!(total, 10);
        assert!(oldest <= now_secs());
    }
}
