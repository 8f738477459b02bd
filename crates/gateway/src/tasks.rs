use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InProgress,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    pub result: Option<serde_json::Value>,
    /// Wall-clock creation time, surfaced to API consumers.
    pub created_at: DateTime<Utc>,
    /// Monotonic creation instant, used for TTL eviction (immune to system
    /// clock adjustments).
    #[serde(skip)]
    pub created_monotonic: Instant,
}

/// In-process task registry (C12): `{task_id, state, result, created_at}`
/// behind a single `RwLock`, evicted after a TTL sweep. Critical sections
/// never `.await`, so a sync lock is enough (no need for `tokio::sync`).
#[derive(Clone)]
pub struct TaskRegistry {
    ttl: Duration,
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create(&self) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.tasks.write().insert(
            task_id.clone(),
            TaskRecord {
                task_id: task_id.clone(),
                state: TaskState::Queued,
                result: None,
                created_at: Utc::now(),
                created_monotonic: Instant::now(),
            },
        );
        task_id
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn transition(&self, task_id: &str, state: TaskState, result: Option<serde_json::Value>) {
        if let Some(record) = self.tasks.write().get_mut(task_id) {
            record.state = state;
            record.result = result;
        }
    }

    /// Removes every record older than the configured TTL.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.tasks
            .write()
            .retain(|_, record| now.duration_since(record.created_monotonic) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let id = registry.create();
        let record = registry.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Queued);
    }

    #[test]
    fn unknown_task_is_none() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn state_transitions_apply() {
        let registry = TaskRegistry::new(Duration::from_secs(3600));
        let id = registry.create();
        registry.transition(&id, TaskState::InProgress, None);
        assert_eq!(registry.get(&id).unwrap().state, TaskState::InProgress);
        registry.transition(&id, TaskState::Done, Some(serde_json::json!({"ok": true})));
        let record = registry.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Done);
        assert_eq!(record.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn eviction_removes_expired_records() {
        let registry = TaskRegistry::new(Duration::from_millis(1));
        let id = registry.create();
        std::thread::sleep(Duration::from_millis(5));
        registry.evict_expired();
        assert!(registry.get(&id).is_none());
    }
}
