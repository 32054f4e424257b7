//! Cache client seam and the two shipped implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Key/value cache consulted before the relational store on point lookups.
///
/// No ordering or durability guarantees are assumed; a fetch may miss at any time.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn store(&self, key: &str, value: String) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local cache backed by a map.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Cache that never holds anything. Every lookup goes to storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

#[async_trait]
impl CacheClient for NullCache {
    async fn fetch(&self, _key: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn store(&self, _key: &str, _value: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
