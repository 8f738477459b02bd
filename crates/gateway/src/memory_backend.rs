use crate::error::AppError;
use async_trait::async_trait;

/// Interface for the optional persistent memory store (vector DB). Its
/// semantics and schema management are out of scope (Non-goals); this crate
/// carries only the readiness surface so that `BackendUnready` (503) is a
/// real, reachable error rather than a row with nothing behind it.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn ensure_ready(&self) -> Result<(), AppError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(AppError::BackendUnready)
        }
    }
}

/// `MEM_BACKEND=none` (the default): never ready.
pub struct NoneBackend;

impl MemoryBackend for NoneBackend {
    fn is_ready(&self) -> bool {
        false
    }
}

/// `MEM_BACKEND=<configured>`: a backend name was supplied but this crate
/// does not implement vector-store semantics, so it still reports unready.
pub struct ConfiguredBackend {
    pub name: String,
}

impl MemoryBackend for ConfiguredBackend {
    fn is_ready(&self) -> bool {
        false
    }
}

pub fn from_env_name(name: &str) -> Box<dyn MemoryBackend> {
    match name {
        "none" | "" => Box::new(NoneBackend),
        other => Box::new(ConfiguredBackend {
            name: other.to_string(),
        }),
    }
}
