use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

/// A deferred engine call, produced by the dispatcher when it chooses to
/// enqueue rather than stream, consumed exactly once by a background worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub request: serde_json::Value,
    pub headers: HashMap<String, String>,
}

/// FIFO job queue (C9). `get` blocks until a job is available and removes it
/// before returning; at-least-once hand-off is acceptable because C11/C10
/// are idempotent at the fingerprint level.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn put(&self, job: Job) -> anyhow::Result<()>;
    async fn get(&self) -> anyhow::Result<Job>;
}

pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn put(&self, job: Job) -> anyhow::Result<()> {
        self.tx.send(job).map_err(|e| anyhow::anyhow!("queue closed: {e}"))
    }

    async fn get(&self) -> anyhow::Result<Job> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("queue closed"))
    }
}

pub struct RedisQueue {
    conn: redis::aio::ConnectionManager,
    list_key: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            list_key: "attach:queue".to_string(),
        })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn put(&self, job: Job) -> anyhow::Result<()> {
        use redis::AsyncCommands as _;
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&job)?;
        let _: () = conn.lpush(&self.list_key, raw).await?;
        Ok(())
    }

    async fn get(&self) -> anyhow::Result<Job> {
        use redis::AsyncCommands as _;
        let mut conn = self.conn.clone();
        let (_key, raw): (String, String) = conn.brpop(&self.list_key, 0.0).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = MemoryQueue::new();
        queue
            .put(Job {
                id: "1".to_string(),
                request: serde_json::json!({}),
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        queue
            .put(Job {
                id: "2".to_string(),
                request: serde_json::json!({}),
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(queue.get().await.unwrap().id, "1");
        assert_eq!(queue.get().await.unwrap().id, "2");
    }
}
