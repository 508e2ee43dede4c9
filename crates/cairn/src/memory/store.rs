//! Memory store and lifecycle manager
//!
//! Validates drafts, scopes every read and write by tenant, and runs the
//! lifecycle passes (decay, prune, expire, consolidate). Mutations of
//! existing records go through a compare-and-swap loop on the memory's
//! version so concurrent access boosts and decay never lose an update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{LifecycleConfig, StorageConfig};
use crate::embedding::{Embedder, check_dimension};
use crate::error::{CairnError, Result};
use crate::memory::consolidation::{self, CONSOLIDATED_TAG};
use crate::memory::decay::apply_decay;
use crate::memory::filter::MemoryFilter;
use crate::memory::types::{Layer, Memory, MemoryDraft, MemoryId, MemoryType};
use crate::storage::{CasOutcome, MemoryStorage, VectorIndex, with_retry};

/// Reject empty tenant ids
pub fn require_tenant(tenant_id: &str) -> Result<()> {
    if tenant_id.trim().is_empty() {
        return Err(CairnError::TenantRequired);
    }
    Ok(())
}

/// Abort if a backend handed back another tenant's memory
pub fn ensure_tenant(memory: &Memory, tenant_id: &str) -> Result<()> {
    if memory.tenant_id != tenant_id {
        tracing::error!(
            expected = tenant_id,
            found = %memory.tenant_id,
            memory_id = %memory.id,
            "Tenant isolation violation"
        );
        return Err(CairnError::TenantIsolationViolation {
            expected: tenant_id.to_string(),
            found: memory.tenant_id.clone(),
        });
    }
    Ok(())
}

pub struct MemoryStore {
    storage: Arc<dyn MemoryStorage>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    lifecycle: LifecycleConfig,
    storage_config: StorageConfig,
}

impl MemoryStore {
    pub fn new(
        storage: Arc<dyn MemoryStorage>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        lifecycle: LifecycleConfig,
        storage_config: StorageConfig,
    ) -> Self {
        Self {
            storage,
            vectors,
            embedder,
            lifecycle,
            storage_config,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    pub fn storage(&self) -> &Arc<dyn MemoryStorage> {
        &self.storage
    }

    pub fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.storage_config.retry_backoff_ms)
    }

    /// Turn an untrusted draft into a memory ready to store
    pub fn validate_draft(&self, draft: MemoryDraft, now: DateTime<Utc>) -> Result<Memory> {
        let tenant_id = match draft.tenant_id {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err(CairnError::TenantRequired),
        };
        let layer: Layer = draft.layer.parse()?;
        let memory_type: MemoryType = draft.memory_type.parse()?;

        let importance = draft.importance.unwrap_or(self.lifecycle.default_importance);
        if !importance.is_finite() || !(0.0..=1.0).contains(&importance) {
            return Err(CairnError::Validation(format!(
                "importance must be within [0, 1], got {importance}"
            )));
        }
        if draft.content.trim().is_empty() {
            return Err(CairnError::Validation("content must not be empty".to_string()));
        }
        if let Some(ref embedding) = draft.embedding {
            check_dimension(embedding, self.storage_config.embedding_dimension)?;
        }

        let expires_at = draft
            .expires_at
            .or_else(|| self.lifecycle.default_ttl(layer).map(|ttl| now + ttl));

        Ok(Memory {
            id: Uuid::new_v4(),
            tenant_id,
            project_id: draft.project_id,
            layer,
            memory_type,
            content: draft.content,
            embedding: draft.embedding,
            importance,
            usage_count: 0,
            created_at: now,
            last_accessed_at: now,
            expires_at,
            tags: draft.tags,
            session_id: draft.session_id,
            metadata: draft.metadata,
            source_ids: draft.source_ids,
            version: 0,
            decayed_at: now,
        })
    }

    /// Validate and persist a draft
    pub async fn store(&self, draft: MemoryDraft) -> Result<MemoryId> {
        let memory = self.validate_draft(draft, Utc::now())?;
        self.insert(memory).await
    }

    /// Persist an already-built memory, embedding it if needed
    pub async fn insert(&self, mut memory: Memory) -> Result<MemoryId> {
        require_tenant(&memory.tenant_id)?;
        memory.set_importance(memory.importance);
        if memory.embedding.is_none() {
            memory.embedding = Some(self.embedder.embed(&memory.content)?);
        }

        let id = memory.id;
        let tenant_id = memory.tenant_id.clone();
        let embedding = memory.embedding.clone();

        with_retry("storage.put", self.backoff(), || self.storage.put(memory.clone())).await?;
        if let Some(embedding) = embedding {
            with_retry("vectors.upsert", self.backoff(), || {
                self.vectors.upsert(id, &tenant_id, &embedding)
            })
            .await?;
        }

        tracing::debug!(tenant_id = %tenant_id, memory_id = %id, "Stored memory");
        Ok(id)
    }

    pub async fn get(&self, id: MemoryId, tenant_id: &str) -> Result<Option<Memory>> {
        require_tenant(tenant_id)?;
        let found =
            with_retry("storage.get", self.backoff(), || self.storage.get(id, tenant_id)).await?;
        if let Some(ref memory) = found {
            ensure_tenant(memory, tenant_id)?;
        }
        Ok(found)
    }

    pub async fn query(&self, filter: &MemoryFilter, tenant_id: &str) -> Result<Vec<Memory>> {
        require_tenant(tenant_id)?;
        let found = with_retry("storage.query", self.backoff(), || {
            self.storage.query(filter, tenant_id)
        })
        .await?;
        for memory in &found {
            ensure_tenant(memory, tenant_id)?;
        }
        Ok(found)
    }

    pub async fn count(&self, tenant_id: &str) -> Result<usize> {
        Ok(self.query(&MemoryFilter::new(), tenant_id).await?.len())
    }

    /// Delete a memory and its vector. Absent and foreign ids both yield false.
    pub async fn delete(&self, id: MemoryId, tenant_id: &str) -> Result<bool> {
        require_tenant(tenant_id)?;
        let deleted =
            with_retry("storage.delete", self.backoff(), || self.storage.delete(id, tenant_id))
                .await?;
        if deleted {
            with_retry("vectors.remove", self.backoff(), || {
                self.vectors.remove(id, tenant_id)
            })
            .await?;
        }
        Ok(deleted)
    }

    /// Read-modify-write under compare-and-swap. `change` returns false to
    /// leave the memory untouched. Returns the stored memory, or `None` if
    /// it does not exist for this tenant.
    async fn modify<F>(&self, id: MemoryId, tenant_id: &str, mut change: F) -> Result<Option<Memory>>
    where
        F: FnMut(&mut Memory) -> bool,
    {
        for _ in 0..self.storage_config.cas_max_attempts.max(1) {
            let Some(current) = self.get(id, tenant_id).await? else {
                return Ok(None);
            };

            let mut updated = current.clone();
            if !change(&mut updated) {
                return Ok(Some(current));
            }

            let outcome = with_retry("storage.compare_and_swap", self.backoff(), || {
                self.storage.compare_and_swap(updated.clone(), current.version)
            })
            .await?;

            match outcome {
                CasOutcome::Swapped => {
                    updated.version = current.version + 1;
                    return Ok(Some(updated));
                }
                CasOutcome::Missing => return Ok(None),
                CasOutcome::Conflict => {
                    tracing::debug!(memory_id = %id, "Version conflict, retrying update");
                }
            }
        }

        Err(CairnError::StorageUnavailable(format!(
            "update of memory {id} kept conflicting"
        )))
    }

    /// Record an access: usage up, timestamp set, bounded importance boost.
    /// Returns false when the memory is absent or belongs to another tenant.
    pub async fn update_access(&self, id: MemoryId, tenant_id: &str) -> Result<bool> {
        let now = Utc::now();
        let lifecycle = &self.lifecycle;
        let updated = self
            .modify(id, tenant_id, |m| {
                // Decay is settled by the decay pass only
                m.mark_accessed(lifecycle.access_boost(m.layer), now);
                true
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Replace a memory's embedding and re-index it
    pub async fn update_embedding(
        &self,
        id: MemoryId,
        tenant_id: &str,
        embedding: Vec<f32>,
    ) -> Result<bool> {
        check_dimension(&embedding, self.storage_config.embedding_dimension)?;
        let updated = self
            .modify(id, tenant_id, |m| {
                m.embedding = Some(embedding.clone());
                true
            })
            .await?;

        if updated.is_none() {
            return Ok(false);
        }
        with_retry("vectors.upsert", self.backoff(), || {
            self.vectors.upsert(id, tenant_id, &embedding)
        })
        .await?;
        Ok(true)
    }

    /// Apply decay to every memory of the tenant. Returns how many changed.
    pub async fn decay(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let memories = self.query(&MemoryFilter::new(), tenant_id).await?;
        let mut count = 0;

        for memory in memories {
            let mut changed = false;
            self.modify(memory.id, tenant_id, |m| {
                changed = apply_decay(m, &self.lifecycle, now);
                changed
            })
            .await?;
            if changed {
                count += 1;
            }
        }

        tracing::debug!(tenant_id, count, "Decay pass complete");
        Ok(count)
    }

    /// Delete unused memories below the threshold. Reflective memories are
    /// only eligible below the much lower reflective floor.
    pub async fn prune(&self, tenant_id: &str, importance_threshold: f64) -> Result<usize> {
        if !(0.0..=1.0).contains(&importance_threshold) {
            return Err(CairnError::Validation(format!(
                "prune threshold must be within [0, 1], got {importance_threshold}"
            )));
        }
        let reflective_threshold = importance_threshold.min(self.lifecycle.reflective_prune_floor);

        let memories = self.query(&MemoryFilter::new(), tenant_id).await?;
        let mut count = 0;
        for memory in memories {
            let threshold = if memory.layer == Layer::Reflective {
                reflective_threshold
            } else {
                importance_threshold
            };
            if memory.usage_count == 0
                && memory.importance < threshold
                && self.delete(memory.id, tenant_id).await?
            {
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(tenant_id, count, "Pruned memories");
        }
        Ok(count)
    }

    /// Delete memories whose `expires_at` has passed
    pub async fn expire(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let memories = self.query(&MemoryFilter::new(), tenant_id).await?;
        let mut count = 0;
        for memory in memories {
            if memory.is_expired(now) && self.delete(memory.id, tenant_id).await? {
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(tenant_id, count, "Expired memories");
        }
        Ok(count)
    }

    /// Fold a session's working and episodic memories into one long-term
    /// memory. Sources are left in place.
    pub async fn consolidate(&self, session_id: &str, tenant_id: &str) -> Result<MemoryId> {
        let filter = MemoryFilter::new().with_session(session_id);
        let sources: Vec<Memory> = self
            .query(&filter, tenant_id)
            .await?
            .into_iter()
            .filter(|m| {
                (m.layer == Layer::Working || m.memory_type == MemoryType::Episodic)
                    && !m.has_tag(CONSOLIDATED_TAG)
            })
            .collect();

        let summary = consolidation::summarize(&sources, &self.lifecycle).ok_or_else(|| {
            CairnError::NotFound(format!("no memories to consolidate in session {session_id}"))
        })?;

        let mut memory = Memory::new(tenant_id, Layer::LongTerm, MemoryType::Semantic, summary.content);
        memory.project_id = sources
            .first()
            .map(|m| m.project_id.clone())
            .unwrap_or_default();
        memory.embedding = summary.embedding;
        memory.set_importance(summary.importance);
        memory.tags = summary.tags;
        memory.session_id = Some(session_id.to_string());
        memory.source_ids = summary.source_ids;
        memory.metadata.insert(
            "consolidated_from_session".to_string(),
            serde_json::json!(session_id),
        );

        let source_count = memory.source_ids.len();
        let id = self.insert(memory).await?;
        tracing::info!(tenant_id, session_id, source_count, memory_id = %id, "Consolidated session");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::{InMemoryStorage, InMemoryVectorIndex};
    use chrono::Duration as ChronoDuration;

    fn store() -> MemoryStore {
        let storage_config = StorageConfig {
            embedding_dimension: 32,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        MemoryStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashingEmbedder::new(32)),
            LifecycleConfig::default(),
            storage_config,
        )
    }

    mod validation {
        use super::*;

        #[tokio::test]
        async fn test_missing_tenant() {
            let s = store();
            let mut draft = MemoryDraft::new("", "working", "episodic", "x");
            assert!(matches!(s.store(draft.clone()).await, Err(CairnError::TenantRequired)));
            draft.tenant_id = None;
            assert!(matches!(s.store(draft).await, Err(CairnError::TenantRequired)));
        }

        #[tokio::test]
        async fn test_bad_enums_and_range() {
            let s = store();
            let bad_layer = MemoryDraft::new("t1", "archive", "episodic", "x");
            assert!(matches!(s.store(bad_layer).await, Err(CairnError::Validation(_))));

            let bad_type = MemoryDraft::new("t1", "working", "opinion", "x");
            assert!(matches!(s.store(bad_type).await, Err(CairnError::Validation(_))));

            let bad_importance =
                MemoryDraft::new("t1", "working", "episodic", "x").with_importance(1.2);
            assert!(matches!(s.store(bad_importance).await, Err(CairnError::Validation(_))));

            let bad_dim = MemoryDraft::new("t1", "working", "episodic", "x")
                .with_embedding(vec![0.1; 3]);
            assert!(matches!(s.store(bad_dim).await, Err(CairnError::Validation(_))));
        }

        #[tokio::test]
        async fn test_defaults_applied() {
            let s = store();
            let id = s
                .store(MemoryDraft::new("t1", "sensory", "sensory", "a noise"))
                .await
                .unwrap();
            let m = s.get(id, "t1").await.unwrap().unwrap();
            assert_eq!(m.importance, 0.5);
            assert_eq!(m.expires_at, Some(m.created_at + ChronoDuration::hours(24)));
            assert_eq!(m.embedding.as_ref().map(Vec::len), Some(32));
        }
    }

    mod access {
        use super::*;

        #[tokio::test]
        async fn test_update_access_boosts_and_counts() {
            let s = store();
            let id = s
                .store(MemoryDraft::new("t1", "working", "episodic", "x").with_importance(0.5))
                .await
                .unwrap();

            assert!(s.update_access(id, "t1").await.unwrap());
            let m = s.get(id, "t1").await.unwrap().unwrap();
            assert_eq!(m.usage_count, 1);
            assert!(m.importance > 0.5 && m.importance <= 0.6 + 1e-9);
            assert_eq!(m.version, 1);
        }

        #[tokio::test]
        async fn test_wrong_tenant_looks_absent() {
            let s = store();
            let id = s
                .store(MemoryDraft::new("t1", "working", "episodic", "x"))
                .await
                .unwrap();

            assert!(!s.update_access(id, "t2").await.unwrap());
            assert!(!s.update_access(Uuid::new_v4(), "t1").await.unwrap());
            let m = s.get(id, "t1").await.unwrap().unwrap();
            assert_eq!(m.usage_count, 0);
        }

        #[tokio::test]
        async fn test_concurrent_access_loses_no_update() {
            let s = Arc::new(store());
            let id = s
                .store(MemoryDraft::new("t1", "long_term", "semantic", "x").with_importance(0.1))
                .await
                .unwrap();

            let mut handles = Vec::new();
            for _ in 0..4 {
                let s = s.clone();
                handles.push(tokio::spawn(async move { s.update_access(id, "t1").await }));
            }
            for h in handles {
                assert!(h.await.unwrap().unwrap());
            }

            let m = s.get(id, "t1").await.unwrap().unwrap();
            assert_eq!(m.usage_count, 4);
            assert_eq!(m.version, 4);
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_decay_counts_changed() {
            let s = store();
            s.store(MemoryDraft::new("t1", "working", "episodic", "a"))
                .await
                .unwrap();
            s.store(MemoryDraft::new("t2", "working", "episodic", "b"))
                .await
                .unwrap();

            let later = Utc::now() + ChronoDuration::days(2);
            assert_eq!(s.decay("t1", later).await.unwrap(), 1);
            assert_eq!(s.decay("t1", later).await.unwrap(), 0);

            let t2 = s.query(&MemoryFilter::new(), "t2").await.unwrap();
            assert_eq!(t2[0].importance, 0.5);
        }

        #[tokio::test]
        async fn test_prune_respects_usage_and_reflective_floor() {
            let s = store();
            let low = s
                .store(MemoryDraft::new("t1", "long_term", "semantic", "low").with_importance(0.05))
                .await
                .unwrap();
            let used = s
                .store(MemoryDraft::new("t1", "long_term", "semantic", "used").with_importance(0.05))
                .await
                .unwrap();
            s.update_access(used, "t1").await.unwrap();
            let reflective = s
                .store(
                    MemoryDraft::new("t1", "reflective", "reflection", "lesson")
                        .with_importance(0.05),
                )
                .await
                .unwrap();

            assert_eq!(s.prune("t1", 0.1).await.unwrap(), 1);
            assert!(s.get(low, "t1").await.unwrap().is_none());
            assert!(s.get(used, "t1").await.unwrap().is_some());
            assert!(s.get(reflective, "t1").await.unwrap().is_some());
            assert_eq!(s.prune("t1", 0.1).await.unwrap(), 0);
            assert!(s.prune("t1", 1.5).await.is_err());
        }

        #[tokio::test]
        async fn test_expire() {
            let s = store();
            let past = Utc::now() - ChronoDuration::hours(1);
            s.store(MemoryDraft::new("t1", "long_term", "semantic", "old").with_expires_at(past))
                .await
                .unwrap();
            s.store(MemoryDraft::new("t1", "long_term", "semantic", "keep"))
                .await
                .unwrap();

            assert_eq!(s.expire("t1", Utc::now()).await.unwrap(), 1);
            assert_eq!(s.count("t1").await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_consolidate_session() {
            let s = store();
            for text in ["Deploy started. Cache warmed.", "Deploy finished cleanly."] {
                s.store(MemoryDraft::new("t1", "working", "episodic", text).with_session("s1"))
                    .await
                    .unwrap();
            }

            let id = s.consolidate("s1", "t1").await.unwrap();
            let m = s.get(id, "t1").await.unwrap().unwrap();
            assert_eq!(m.layer, Layer::LongTerm);
            assert_eq!(m.memory_type, MemoryType::Semantic);
            assert_eq!(m.source_ids.len(), 2);
            assert!(m.has_tag(CONSOLIDATED_TAG));
            assert_eq!(s.count("t1").await.unwrap(), 3);

            assert!(matches!(
                s.consolidate("missing", "t1").await,
                Err(CairnError::NotFound(_))
            ));
        }
    }
}
