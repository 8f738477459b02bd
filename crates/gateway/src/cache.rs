use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Content-addressed response cache (C8): `fingerprint -> response`.
///
/// `set(k, v); get(k) == v` until overwritten; no size bound is required by
/// the core spec. Two variants share this interface, the same shape as
/// `RateLimiterEngine`'s `Redis`/`InMemory` implementors.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    async fn set(&self, key: String, value: serde_json::Value) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn set(&self, key: String, value: serde_json::Value) -> anyhow::Result<()> {
        self.inner.write().insert(key, value);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(fingerprint: &str) -> String {
        format!("attach:cache:{fingerprint}")
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        use redis::AsyncCommands as _;
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(key)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    async fn set(&self, key: String, value: serde_json::Value) -> anyhow::Result<()> {
        use redis::AsyncCommands as _;
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&value)?;
        let _: () = conn.set(Self::key(&key), raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("k1".to_string(), json!({"answer": "ok"})).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(json!({"answer": "ok"})));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let cache = MemoryCache::new();
        cache.set("k1".to_string(), json!(1)).await.unwrap();
        cache.set("k1".to_string(), json!(2)).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some(json!(2)));
    }
}
