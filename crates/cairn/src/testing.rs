//! Test utilities for cairn: in-memory stores, scripted model providers
//! and misbehaving storage wrappers for failure-path tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{LifecycleConfig, StorageConfig};
use crate::embedding::HashingEmbedder;
use crate::gateway::{GatewayError, ModelProvider, ProviderResponse};
use crate::memory::{Layer, Memory, MemoryFilter, MemoryId, MemoryStore, MemoryType};
use crate::storage::{
    CasOutcome, InMemoryStorage, InMemoryVectorIndex, MemoryStorage, StorageError, StorageResult,
};

/// Storage settings with a near-zero retry backoff
pub fn fast_storage_config() -> StorageConfig {
    StorageConfig {
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

/// Memory store over fresh in-memory backends
pub fn memory_store() -> MemoryStore {
    memory_store_with(Arc::new(InMemoryStorage::new()))
}

/// Memory store over the given storage with an in-memory vector index
pub fn memory_store_with(storage: Arc<dyn MemoryStorage>) -> MemoryStore {
    let config = fast_storage_config();
    MemoryStore::new(
        storage,
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        LifecycleConfig::default(),
        config,
    )
}

/// A memory created `age` ago, never accessed since
pub fn aged_memory(
    tenant_id: &str,
    layer: Layer,
    memory_type: MemoryType,
    content: &str,
    importance: f64,
    age: chrono::Duration,
) -> Memory {
    let created: DateTime<Utc> = Utc::now() - age;
    let mut memory = Memory::new(tenant_id, layer, memory_type, content);
    memory.set_importance(importance);
    memory.created_at = created;
    memory.last_accessed_at = created;
    memory.decayed_at = created;
    memory
}

/// Model provider with a canned answer
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    response: Option<String>,
    cost: f64,
    available: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str, response: &str, cost: f64) -> Self {
        Self {
            name: name.to_string(),
            response: Some(response.to_string()),
            cost,
            available: true,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Available, but every call fails
    pub fn failing(name: &str) -> Self {
        Self {
            response: None,
            ..Self::new(name, "", 0.0)
        }
    }

    /// Reports itself unavailable
    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            ..Self::new(name, "", 0.0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn complete(&self, _prompt: &str) -> Result<ProviderResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.response {
            Some(ref text) => Ok(ProviderResponse {
                text: text.clone(),
                cost: self.cost,
            }),
            None => Err(GatewayError::ProviderFailed {
                provider: self.name.clone(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

/// Storage whose first `failures` calls report the backend unavailable
#[derive(Debug, Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStorage {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryStorage::new(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `failures` calls
    pub fn fail_next(&self, failures: u32) {
        self.failures.store(failures, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn trip(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StorageError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MemoryStorage for FlakyStorage {
    async fn put(&self, memory: Memory) -> StorageResult<()> {
        self.trip()?;
        self.inner.put(memory).await
    }

    async fn get(&self, id: MemoryId, tenant_id: &str) -> StorageResult<Option<Memory>> {
        self.trip()?;
        self.inner.get(id, tenant_id).await
    }

    async fn query(&self, filter: &MemoryFilter, tenant_id: &str) -> StorageResult<Vec<Memory>> {
        self.trip()?;
        self.inner.query(filter, tenant_id).await
    }

    async fn delete(&self, id: MemoryId, tenant_id: &str) -> StorageResult<bool> {
        self.trip()?;
        self.inner.delete(id, tenant_id).await
    }

    async fn compare_and_swap(
        &self,
        memory: Memory,
        expected_version: u64,
    ) -> StorageResult<CasOutcome> {
        self.trip()?;
        self.inner.compare_and_swap(memory, expected_version).await
    }
}

/// Buggy storage that ignores tenant scoping on reads
#[derive(Debug, Default)]
pub struct LeakyStorage {
    inner: InMemoryStorage,
}

impl LeakyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStorage for LeakyStorage {
    async fn put(&self, memory: Memory) -> StorageResult<()> {
        self.inner.put(memory).await
    }

    async fn get(&self, id: MemoryId, _tenant_id: &str) -> StorageResult<Option<Memory>> {
        let mut found = None;
        for tenant in self.inner.tenants() {
            if let Some(m) = self.inner.get(id, &tenant).await? {
                found = Some(m);
                break;
            }
        }
        Ok(found)
    }

    async fn query(&self, filter: &MemoryFilter, _tenant_id: &str) -> StorageResult<Vec<Memory>> {
        let mut all = Vec::new();
        for tenant in self.inner.tenants() {
            all.extend(self.inner.query(filter, &tenant).await?);
        }
        Ok(all)
    }

    async fn delete(&self, id: MemoryId, tenant_id: &str) -> StorageResult<bool> {
        self.inner.delete(id, tenant_id).await
    }

    async fn compare_and_swap(
        &self,
        memory: Memory,
        expected_version: u64,
    ) -> StorageResult<CasOutcome> {
        self.inner.compare_and_swap(memory, expected_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flaky_storage_recovers_after_failures() {
        let storage = FlakyStorage::new(1);
        let memory = Memory::new("t1", Layer::Working, MemoryType::Episodic, "hello");
        assert!(storage.put(memory.clone()).await.is_err());
        assert!(storage.put(memory).await.is_ok());
        assert_eq!(storage.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_provider_counts_calls() {
        let provider = ScriptedProvider::new("alpha", "ok", 0.01);
        assert_eq!(provider.complete("x").await.unwrap().text, "ok");
        assert!(ScriptedProvider::failing("b").complete("x").await.is_err());
        assert!(!ScriptedProvider::unavailable("c").is_available().await);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn aged_memory_is_backdated() {
        let m = aged_memory(
            "t1",
            Layer::Sensory,
            MemoryType::Sensory,
            "old",
            0.05,
            chrono::Duration::days(2),
        );
        assert!(m.created_at < Utc::now() - chrono::Duration::days(1));
        assert_eq!(m.importance, 0.05);
    }
}
