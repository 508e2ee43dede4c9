//! The `Cairn` engine wires the memory store, the decision layer, hybrid
//! search and the reflection pipeline together over pluggable backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::Result;
use crate::gateway::{ModelGateway, ProviderGateway, Strategy};
use crate::math::{
    BudgetLedger, BudgetStatus, DynamicsSnapshot, DynamicsTracker, PolicyDecision,
    PolicyOptimizer, QueryFeatures, RetrievalWeights, StructureAnalyzer, StructureSnapshot,
};
use crate::memory::store::require_tenant;
use crate::memory::{Memory, MemoryDraft, MemoryFilter, MemoryId, MemoryStore};
use crate::reflection::{
    Actor, Evaluator, GatewayInsightGenerator, Outcome, ReflectionLedger, ReflectionRecord,
    Reflector, TemplateInsightGenerator, evaluator_from_config,
};
use crate::search::{HybridSearch, SearchResults};
use crate::storage::{
    GraphStore, InMemoryGraphStore, InMemoryStorage, InMemoryVectorIndex, MemoryStorage,
    VectorIndex,
};

/// Builder for [`Cairn`]. Backends default to the in-process ones.
pub struct CairnBuilder {
    config: Config,
    storage: Option<Arc<dyn MemoryStorage>>,
    vectors: Option<Arc<dyn VectorIndex>>,
    graph_store: Option<Arc<dyn GraphStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    gateway: Option<Arc<dyn ModelGateway>>,
    evaluator: Option<Arc<dyn Evaluator>>,
}

impl CairnBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            vectors: None,
            graph_store: None,
            embedder: None,
            gateway: None,
            evaluator: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn MemoryStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn vector_index(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn graph_store(mut self, graph_store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = Some(graph_store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> Result<Cairn> {
        let config = self.config;
        config.validate()?;
        let strategy = Strategy::from_config(&config.gateway)?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let vectors = self
            .vectors
            .unwrap_or_else(|| Arc::new(InMemoryVectorIndex::new()));
        let graph_store = self
            .graph_store
            .unwrap_or_else(|| Arc::new(InMemoryGraphStore::new()));
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::new(config.storage.embedding_dimension)));
        let gateway = self
            .gateway
            .unwrap_or_else(|| Arc::new(ProviderGateway::new(config.gateway.cache_size)));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| evaluator_from_config(&config.reflection));

        let store = Arc::new(MemoryStore::new(
            storage,
            vectors,
            embedder,
            config.lifecycle.clone(),
            config.storage.clone(),
        ));
        let structure = Arc::new(StructureAnalyzer::new(
            store.clone(),
            graph_store.clone(),
            config.structure.clone(),
            &config.storage,
        ));
        let dynamics = Arc::new(DynamicsTracker::new(
            store.clone(),
            structure.clone(),
            config.dynamics.clone(),
        ));
        let policy = Arc::new(PolicyOptimizer::new(config.policy.clone()));
        let budget = Arc::new(BudgetLedger::new(config.budget.clone()));
        let ledger = Arc::new(ReflectionLedger::new());

        let search = HybridSearch::new(store.clone(), graph_store.clone(), config.search.clone());
        let actor = Actor::new(store.clone(), ledger.clone());
        let full = Arc::new(GatewayInsightGenerator::new(
            gateway.clone(),
            strategy,
            Duration::from_millis(config.reflection.gateway_timeout_ms),
        ));
        let reflector = Reflector::new(
            store.clone(),
            ledger,
            policy.clone(),
            budget.clone(),
            dynamics.clone(),
            evaluator,
            full,
            Arc::new(TemplateInsightGenerator),
        );

        tracing::info!(
            gateway_mode = %config.gateway.mode,
            evaluator = ?config.reflection.evaluator,
            "Cairn engine ready"
        );

        Ok(Cairn {
            config,
            store,
            structure,
            dynamics,
            policy,
            budget,
            search,
            actor,
            reflector,
        })
    }
}

pub struct Cairn {
    config: Config,
    store: Arc<MemoryStore>,
    structure: Arc<StructureAnalyzer>,
    dynamics: Arc<DynamicsTracker>,
    policy: Arc<PolicyOptimizer>,
    budget: Arc<BudgetLedger>,
    search: HybridSearch,
    actor: Actor,
    reflector: Reflector,
}

impl Cairn {
    pub fn builder(config: Config) -> CairnBuilder {
        CairnBuilder::new(config)
    }

    /// Engine over in-process backends
    pub fn in_memory(config: Config) -> Result<Self> {
        CairnBuilder::new(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn structure(&self) -> &Arc<StructureAnalyzer> {
        &self.structure
    }

    pub fn dynamics(&self) -> &Arc<DynamicsTracker> {
        &self.dynamics
    }

    pub fn policy(&self) -> &Arc<PolicyOptimizer> {
        &self.policy
    }

    pub fn budget(&self) -> &Arc<BudgetLedger> {
        &self.budget
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    // Memory operations

    pub async fn store_memory(&self, draft: MemoryDraft) -> Result<MemoryId> {
        self.store.store(draft).await
    }

    pub async fn get(&self, id: MemoryId, tenant_id: &str) -> Result<Option<Memory>> {
        self.store.get(id, tenant_id).await
    }

    pub async fn query(&self, filter: &MemoryFilter, tenant_id: &str) -> Result<Vec<Memory>> {
        self.store.query(filter, tenant_id).await
    }

    pub async fn update_access(&self, id: MemoryId, tenant_id: &str) -> Result<bool> {
        self.store.update_access(id, tenant_id).await
    }

    pub async fn consolidate(&self, session_id: &str, tenant_id: &str) -> Result<MemoryId> {
        self.store.consolidate(session_id, tenant_id).await
    }

    // Search

    /// Retrieval weights for a query, from the latest structure snapshot
    /// and the tenant's budget
    pub fn retrieval_weights(&self, query: &str, tenant_id: &str) -> (RetrievalWeights, PolicyDecision) {
        let snapshot = self.structure.latest(tenant_id);
        let features = QueryFeatures::from_query(query, snapshot.as_deref(), self.config.search.max_seeds);
        let budget = self.budget.status(tenant_id);
        self.policy.choose_retrieval_weights(tenant_id, &features, &budget)
    }

    /// Hybrid search with policy-chosen weights
    pub async fn search(
        &self,
        query: &str,
        filter: &MemoryFilter,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        require_tenant(tenant_id)?;
        let (weights, _) = self.retrieval_weights(query, tenant_id);
        self.search_with_weights(query, filter, tenant_id, &weights, limit)
            .await
    }

    pub async fn search_with_weights(
        &self,
        query: &str,
        filter: &MemoryFilter,
        tenant_id: &str,
        weights: &RetrievalWeights,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        self.search
            .search(query, filter, tenant_id, weights, limit)
            .await
    }

    /// Search and record an access on every returned memory
    pub async fn recall(
        &self,
        query: &str,
        filter: &MemoryFilter,
        tenant_id: &str,
        limit: Option<usize>,
    ) -> Result<SearchResults> {
        let results = self.search(query, filter, tenant_id, limit).await?;
        for scored in &results.memories {
            if let Err(e) = self.store.update_access(scored.memory.id, tenant_id).await {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(tenant_id, memory_id = %scored.memory.id, error = %e, "Failed to record access");
            }
        }
        Ok(results)
    }

    // Decision layer

    pub async fn analyze_structure(&self, tenant_id: &str) -> Result<Arc<StructureSnapshot>> {
        self.structure.analyze_structure(tenant_id).await
    }

    pub async fn track_dynamics(
        &self,
        tenant_id: &str,
        window: chrono::Duration,
    ) -> Result<Arc<DynamicsSnapshot>> {
        self.dynamics.track_dynamics(tenant_id, window).await
    }

    pub fn decide_prune_trigger(&self, tenant_id: &str) -> (bool, PolicyDecision) {
        let structure = self.structure.latest(tenant_id);
        let dynamics = self.dynamics.latest(tenant_id);
        self.policy
            .decide_prune_trigger(tenant_id, structure.as_deref(), dynamics.as_deref())
    }

    pub fn budget_status(&self, tenant_id: &str) -> BudgetStatus {
        self.budget.status(tenant_id)
    }

    /// Quality measured before and after a reflection was put into context
    pub fn record_reflection_gain(
        &self,
        tenant_id: &str,
        pattern: &str,
        quality_before: f64,
        quality_after: f64,
    ) -> Option<f64> {
        self.dynamics
            .record_reflection_gain(tenant_id, pattern, quality_before, quality_after)
    }

    // Reflection

    pub async fn record_outcome(&self, outcome: Outcome) -> Result<Uuid> {
        self.actor.record_outcome(outcome).await
    }

    pub async fn reflect(&self, outcome_id: Uuid, tenant_id: &str) -> Result<ReflectionRecord> {
        self.reflector.reflect(outcome_id, tenant_id).await
    }

    pub async fn reflect_pending(&self, tenant_id: &str) -> Result<Vec<ReflectionRecord>> {
        self.reflector.reflect_pending(tenant_id).await
    }

    pub fn reflection_record(&self, outcome_id: Uuid, tenant_id: &str) -> Option<ReflectionRecord> {
        self.reflector.ledger().record(outcome_id, tenant_id)
    }

    /// Forget settled reflection records older than the configured retention
    pub fn evict_settled_reflections(&self, tenant_id: &str, now: DateTime<Utc>) -> usize {
        let cutoff = i64::try_from(self.config.reflection.record_retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|retention| now.checked_sub_signed(retention));
        match cutoff {
            Some(cutoff) => self.reflector.ledger().evict_terminal(tenant_id, cutoff),
            None => 0,
        }
    }
}
