//! Hybrid search
//!
//! Runs the vector, sparse, full-text and graph strategies concurrently
//! under one deadline and fuses their ranked lists with weighted RRF.
//! A strategy that fails or times out contributes an empty list and is
//! reported in [`SearchResults::degraded`]; only a tenant isolation
//! violation fails the whole query.

pub mod bm25;
pub mod fusion;
pub mod strategies;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, join_all};
use serde::Serialize;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::math::RetrievalWeights;
use crate::memory::store::require_tenant;
use crate::memory::{Memory, MemoryFilter, MemoryStore};
use crate::storage::GraphStore;

pub use fusion::{RankedList, fuse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Vector,
    Graph,
    Sparse,
    FullText,
}

impl RetrievalStrategy {
    pub const ALL: [RetrievalStrategy; 4] = [
        RetrievalStrategy::Vector,
        RetrievalStrategy::Graph,
        RetrievalStrategy::Sparse,
        RetrievalStrategy::FullText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Vector => "vector",
            RetrievalStrategy::Graph => "graph",
            RetrievalStrategy::Sparse => "sparse",
            RetrievalStrategy::FullText => "fulltext",
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fused result
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
    /// 1-based rank per strategy that returned this memory
    pub ranks: BTreeMap<RetrievalStrategy, usize>,
}

/// A strategy that contributed nothing because it failed or ran out of time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedStrategy {
    pub strategy: RetrievalStrategy,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub memories: Vec<ScoredMemory>,
    pub degraded: Vec<DegradedStrategy>,
}

impl SearchResults {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}

pub struct HybridSearch {
    store: Arc<MemoryStore>,
    graph_store: Arc<dyn GraphStore>,
    config: SearchConfig,
}

impl HybridSearch {
    pub fn new(store: Arc<MemoryStore>, graph_store: Arc<dyn GraphStore>, config: SearchConfig) -> Self {
        Self {
            store,
            graph_store,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search with the configured strategy deadline
    pub async fn search(
        &self,
        query: &str,
        filter: &MemoryFilter,
        tenant_id: &str,
        weights: &RetrievalWeights,
        limit: usize,
    ) -> Result<SearchResults> {
        let deadline = Duration::from_millis(self.config.strategy_timeout_ms);
        self.search_with_deadline(query, filter, tenant_id, weights, limit, deadline)
            .await
    }

    /// Search with a caller-supplied deadline. Strategies still running when
    /// it expires are cancelled and fusion proceeds with what finished.
    pub async fn search_with_deadline(
        &self,
        query: &str,
        filter: &MemoryFilter,
        tenant_id: &str,
        weights: &RetrievalWeights,
        limit: usize,
        deadline: Duration,
    ) -> Result<SearchResults> {
        require_tenant(tenant_id)?;
        if limit == 0 || query.trim().is_empty() {
            return Ok(SearchResults::default());
        }

        let active: Vec<RetrievalStrategy> = RetrievalStrategy::ALL
            .into_iter()
            .filter(|s| fusion::strategy_weight(weights, *s) > 0.0)
            .collect();

        let runs = active.iter().map(|&strategy| {
            let call = self.run_strategy(strategy, query, filter, tenant_id);
            async move { (strategy, tokio::time::timeout(deadline, call).await) }
        });
        let outcomes = join_all(runs).await;

        let mut lists = Vec::with_capacity(outcomes.len());
        let mut degraded = Vec::new();
        for (strategy, outcome) in outcomes {
            match outcome {
                Ok(Ok(memories)) => lists.push(RankedList::new(strategy, memories)),
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => {
                    tracing::warn!(tenant_id, %strategy, error = %e, "Search strategy failed");
                    degraded.push(DegradedStrategy {
                        strategy,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        tenant_id,
                        %strategy,
                        deadline_ms = deadline.as_millis() as u64,
                        "Search strategy timed out"
                    );
                    degraded.push(DegradedStrategy {
                        strategy,
                        reason: format!("timed out after {}ms", deadline.as_millis()),
                    });
                }
            }
        }

        let mut memories = fuse(&lists, weights, self.config.rrf_k);
        memories.truncate(limit);
        tracing::debug!(
            tenant_id,
            results = memories.len(),
            strategies = lists.len(),
            degraded = degraded.len(),
            "Hybrid search complete"
        );

        Ok(SearchResults { memories, degraded })
    }

    fn run_strategy<'a>(
        &'a self,
        strategy: RetrievalStrategy,
        query: &'a str,
        filter: &'a MemoryFilter,
        tenant_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Memory>>> {
        let store = self.store.as_ref();
        let config = &self.config;
        match strategy {
            RetrievalStrategy::Vector => {
                strategies::vector(store, query, filter, tenant_id, config).boxed()
            }
            RetrievalStrategy::Sparse => {
                strategies::sparse(store, query, filter, tenant_id, config).boxed()
            }
            RetrievalStrategy::FullText => {
                strategies::fulltext(store, query, filter, tenant_id, config).boxed()
            }
            RetrievalStrategy::Graph => strategies::graph(
                store,
                self.graph_store.as_ref(),
                query,
                filter,
                tenant_id,
                config,
            )
            .boxed(),
        }
    }
}
