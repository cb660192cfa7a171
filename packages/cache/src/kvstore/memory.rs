use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{KvBackend, KvError};

/// In-memory index backend.
///
/// The default for tests and single-process deployments; nothing survives
/// a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.map.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), KvError> {
        self.map.clear();
        Ok(())
    }
}
