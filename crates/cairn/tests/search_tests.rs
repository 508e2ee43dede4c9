//! Integration tests for hybrid search
//!
//! Tests verify that:
//! - Weighted RRF fusion is deterministic for identical inputs
//! - No query ever returns another tenant's memory, even with adversarial
//!   graph nodes pointing across tenants
//! - A backend leaking foreign rows fails the query with an isolation error
//! - A slow strategy degrades the result instead of failing it
//! - Recall records an access on every returned memory

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use cairn::config::Config;
use cairn::engine::Cairn;
use cairn::error::CairnError;
use cairn::graph::{GraphEdge, GraphNode};
use cairn::math::RetrievalWeights;
use cairn::memory::{Layer, Memory, MemoryDraft, MemoryFilter, MemoryType};
use cairn::search::{RankedList, RetrievalStrategy, fuse};
use cairn::storage::{GraphStore, InMemoryGraphStore, StorageResult};
use cairn::testing::LeakyStorage;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn engine_with_graph(graph: Arc<dyn GraphStore>) -> Cairn {
    Cairn::builder(Config::default())
        .graph_store(graph)
        .build()
        .unwrap()
}

async fn seed(cairn: &Cairn, tenant: &str, contents: &[&str]) {
    for content in contents {
        cairn
            .store_memory(MemoryDraft::new(tenant, "long_term", "semantic", *content))
            .await
            .unwrap();
    }
}

fn node(tenant: &str, id: &str, sources: Vec<uuid::Uuid>) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        tenant_id: tenant.to_string(),
        label: id.to_string(),
        properties: BTreeMap::new(),
        importance: 0.9,
        sources,
    }
}

fn edge(tenant: &str, from: &str, to: &str) -> GraphEdge {
    GraphEdge {
        tenant_id: tenant.to_string(),
        source_id: from.to_string(),
        target_id: to.to_string(),
        relation_type: "co_occurs".to_string(),
        confidence: 1.0,
    }
}

// =============================================================================
// Fusion
// =============================================================================

#[test]
fn test_fusion_order_is_deterministic() {
    let memories: Vec<Memory> = (0..6)
        .map(|i| {
            let mut m = Memory::new("t1", Layer::LongTerm, MemoryType::Semantic, format!("m{i}"));
            m.set_importance(if i % 2 == 0 { 0.5 } else { 0.7 });
            m
        })
        .collect();
    let pick = |idx: &[usize]| idx.iter().map(|&i| memories[i].clone()).collect::<Vec<_>>();

    let lists = vec![
        RankedList::new(RetrievalStrategy::Vector, pick(&[0, 1, 2, 3])),
        RankedList::new(RetrievalStrategy::Graph, pick(&[3, 4, 0])),
        RankedList::new(RetrievalStrategy::Sparse, pick(&[5, 2, 1])),
    ];
    let weights = RetrievalWeights::new(0.5, 0.3, 0.2, 0.0);

    let first: Vec<_> = fuse(&lists, &weights, 60.0).iter().map(|s| s.memory.id).collect();
    for _ in 0..10 {
        let again: Vec<_> = fuse(&lists, &weights, 60.0).iter().map(|s| s.memory.id).collect();
        assert_eq!(first, again);
    }
    // Memory 0 is first for vector and third for graph
    assert_eq!(first[0], memories[0].id);
    assert_eq!(first.len(), 6);
}

#[tokio::test]
async fn test_search_is_repeatable() {
    let cairn = engine_with_graph(Arc::new(InMemoryGraphStore::new()));
    seed(
        &cairn,
        "t1",
        &[
            "Atlas deploys run on Kubernetes",
            "Kubernetes pods restart after OOM",
            "Atlas uses Postgres for billing",
            "Lunch order for Friday",
        ],
    )
    .await;
    cairn.analyze_structure("t1").await.unwrap();

    let filter = MemoryFilter::new();
    let first = cairn.search("Atlas Kubernetes", &filter, "t1", Some(10)).await.unwrap();
    let second = cairn.search("Atlas Kubernetes", &filter, "t1", Some(10)).await.unwrap();
    let ids = |r: &cairn::search::SearchResults| r.memories.iter().map(|s| s.memory.id).collect::<Vec<_>>();
    assert!(!first.is_empty());
    assert_eq!(ids(&first), ids(&second));
    assert!(first.memories[0].memory.content.contains("Atlas"));
}

#[tokio::test]
async fn test_zero_weight_strategies_are_skipped() {
    let cairn = engine_with_graph(Arc::new(InMemoryGraphStore::new()));
    seed(&cairn, "t1", &["rotate the signing key", "key ceremony checklist"]).await;

    let weights = RetrievalWeights::new(0.0, 0.0, 0.0, 1.0);
    let results = cairn
        .search_with_weights("signing key", &MemoryFilter::new(), "t1", &weights, None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    for scored in &results.memories {
        assert!(scored.ranks.keys().all(|s| *s == RetrievalStrategy::FullText));
    }
}

#[tokio::test]
async fn test_search_requires_tenant() {
    let cairn = engine_with_graph(Arc::new(InMemoryGraphStore::new()));
    let result = cairn.search("anything", &MemoryFilter::new(), "", None).await;
    assert!(matches!(result, Err(CairnError::TenantRequired)));
}

// =============================================================================
// Tenant Isolation
// =============================================================================

const VOCAB: &[&str] = &[
    "Atlas", "Kubernetes", "Postgres", "billing", "deploy", "rollback", "latency", "Redis",
    "cache", "incident",
];

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCAB), 2..6).prop_map(|words| words.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Results only ever hold the querying tenant's memories, whatever the
    /// other tenant stores and however its ids leak into the graph.
    #[test]
    fn search_never_crosses_tenants(
        tenants in (("[a-m]{3,6}"), ("[n-z]{3,6}")),
        own in prop::collection::vec(sentence(), 1..6),
        foreign in prop::collection::vec(sentence(), 1..6),
        query in sentence(),
    ) {
        let (tenant_a, tenant_b) = tenants;
        let rt = runtime();
        rt.block_on(async {
            let graph = Arc::new(InMemoryGraphStore::new());
            let cairn = engine_with_graph(graph.clone());

            for content in &own {
                cairn.store_memory(MemoryDraft::new(tenant_a.as_str(), "long_term", "semantic", content.as_str())).await.unwrap();
            }
            let mut foreign_ids = Vec::new();
            for content in &foreign {
                let id = cairn.store_memory(MemoryDraft::new(tenant_b.as_str(), "long_term", "semantic", content.as_str())).await.unwrap();
                foreign_ids.push(id);
            }
            cairn.analyze_structure(&tenant_a).await.unwrap();
            cairn.analyze_structure(&tenant_b).await.unwrap();

            // Adversarial nodes in tenant A's graph pointing at tenant B
            for word in VOCAB {
                let id = word.to_lowercase();
                let hijack = format!("{id}-x");
                graph.upsert_node(&tenant_a, node(&tenant_a, &hijack, foreign_ids.clone())).await.unwrap();
                graph.upsert_node(&tenant_a, node(&tenant_b, &format!("{id}-y"), foreign_ids.clone())).await.unwrap();
                graph.upsert_edge(&tenant_a, edge(&tenant_a, &id, &hijack)).await.unwrap();
                graph.upsert_edge(&tenant_a, edge(&tenant_a, &id, &format!("{id}-y"))).await.unwrap();
            }

            let weights = RetrievalWeights::new(0.25, 0.25, 0.25, 0.25);
            let results = cairn
                .search_with_weights(&query, &MemoryFilter::new(), &tenant_a, &weights, Some(50))
                .await
                .unwrap();
            for scored in &results.memories {
                prop_assert_eq!(&scored.memory.tenant_id, &tenant_a);
                prop_assert!(!foreign_ids.contains(&scored.memory.id));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn test_leaking_backend_fails_with_isolation_violation() {
    let cairn = Cairn::builder(Config::default())
        .storage(Arc::new(LeakyStorage::new()))
        .build()
        .unwrap();
    seed(&cairn, "alpha", &["alpha runbook for Atlas"]).await;
    seed(&cairn, "beta", &["beta runbook for Atlas"]).await;

    let weights = RetrievalWeights::new(0.0, 0.0, 0.5, 0.5);
    let result = cairn
        .search_with_weights("runbook Atlas", &MemoryFilter::new(), "alpha", &weights, None)
        .await;
    assert!(matches!(result, Err(CairnError::TenantIsolationViolation { .. })));
}

// =============================================================================
// Degradation
// =============================================================================

/// Graph store that never answers within any reasonable deadline
struct StalledGraphStore;

#[async_trait]
impl GraphStore for StalledGraphStore {
    async fn upsert_node(&self, _tenant_id: &str, _node: GraphNode) -> StorageResult<()> {
        Ok(())
    }

    async fn upsert_edge(&self, _tenant_id: &str, _edge: GraphEdge) -> StorageResult<()> {
        Ok(())
    }

    async fn neighbors(
        &self,
        _tenant_id: &str,
        _node_id: &str,
        _depth: usize,
    ) -> StorageResult<Vec<(GraphNode, usize)>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn replace(
        &self,
        _tenant_id: &str,
        _nodes: Vec<GraphNode>,
        _edges: Vec<GraphEdge>,
    ) -> StorageResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_strategy_degrades_the_query() {
    let mut config = Config::default();
    config.search.strategy_timeout_ms = 50;
    let cairn = Cairn::builder(config)
        .graph_store(Arc::new(StalledGraphStore))
        .build()
        .unwrap();
    seed(&cairn, "t1", &["Atlas release notes", "Atlas rollback plan"]).await;

    let weights = RetrievalWeights::new(0.25, 0.25, 0.25, 0.25);
    let results = cairn
        .search_with_weights("Atlas rollback", &MemoryFilter::new(), "t1", &weights, None)
        .await
        .unwrap();

    assert!(results.is_degraded());
    assert_eq!(results.degraded.len(), 1);
    assert_eq!(results.degraded[0].strategy, RetrievalStrategy::Graph);
    assert!(!results.is_empty());
}

// =============================================================================
// Recall
// =============================================================================

#[tokio::test]
async fn test_recall_records_access() {
    let cairn = engine_with_graph(Arc::new(InMemoryGraphStore::new()));
    seed(&cairn, "t1", &["the staging database password lives in vault"]).await;

    let results = cairn
        .recall("staging database", &MemoryFilter::new(), "t1", None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let memory = cairn
        .get(results.memories[0].memory.id, "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(memory.usage_count, 1);
}
