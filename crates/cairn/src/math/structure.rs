//! Structure analyzer
//!
//! Rebuilds a tenant's knowledge graph from its memories and measures its
//! topology: connectivity (GCS), semantic coherence within clusters (SCS),
//! degree entropy, and cluster consistency against the previous snapshot
//! (CCR). Snapshots are cached per tenant as `Arc`s and replaced whole.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::{StorageConfig, StructureConfig};
use crate::embedding::{cosine_similarity, mean_embedding};
use crate::error::Result;
use crate::graph::KnowledgeGraph;
use crate::memory::{Memory, MemoryFilter, MemoryStore};
use crate::storage::{GraphStore, with_retry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSnapshot {
    pub tenant_id: String,
    pub taken_at: DateTime<Utc>,
    /// Share of nodes with at least one edge
    pub gcs: f64,
    /// Mean cosine similarity of node pairs sharing a cluster
    pub scs: f64,
    /// Shannon entropy (bits) of the degree distribution
    pub entropy: f64,
    /// Share of nodes whose cluster label matches the previous snapshot
    pub ccr: f64,
    pub node_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
    /// GCS below the fragmentation threshold
    pub fragmented: bool,
    /// Empty graph; every metric above is 0
    pub insufficient_data: bool,
    /// Whether a previous snapshot existed to compute CCR against
    pub has_previous: bool,
    pub cluster_labels: BTreeMap<String, String>,
    pub node_degrees: BTreeMap<String, usize>,
    pub edge_keys: BTreeSet<(String, String)>,
}

impl StructureSnapshot {
    /// Share of the given entities that are connected nodes; `None` if
    /// none of them is in the graph
    pub fn topic_gcs<'a>(&self, entities: impl IntoIterator<Item = &'a String>) -> Option<f64> {
        let mut known = 0usize;
        let mut connected = 0usize;
        for entity in entities {
            if let Some(&degree) = self.node_degrees.get(entity) {
                known += 1;
                if degree > 0 {
                    connected += 1;
                }
            }
        }
        (known > 0).then(|| connected as f64 / known as f64)
    }
}

/// Compute every structure metric for one graph
pub fn compute_snapshot(
    graph: &KnowledgeGraph,
    node_embeddings: &HashMap<String, Vec<f32>>,
    previous: Option<&StructureSnapshot>,
    fragmentation_threshold: f64,
) -> StructureSnapshot {
    let cluster_labels = graph.cluster_labels();
    let node_degrees: BTreeMap<String, usize> = graph
        .nodes()
        .iter()
        .map(|n| (n.id.clone(), graph.degree(&n.id)))
        .collect();
    let cluster_count = cluster_labels.values().collect::<BTreeSet<_>>().len();

    let mut snapshot = StructureSnapshot {
        tenant_id: graph.tenant_id().to_string(),
        taken_at: Utc::now(),
        gcs: 0.0,
        scs: 0.0,
        entropy: 0.0,
        ccr: 0.0,
        node_count: graph.node_count(),
        edge_count: graph.edge_count(),
        cluster_count,
        fragmented: false,
        insufficient_data: graph.is_empty(),
        has_previous: previous.is_some(),
        cluster_labels,
        node_degrees,
        edge_keys: graph.edge_keys(),
    };

    if graph.is_empty() {
        return snapshot;
    }

    let total = graph.node_count() as f64;
    let degrees = graph.degrees();

    snapshot.gcs = degrees.iter().filter(|&&d| d > 0).count() as f64 / total;
    snapshot.fragmented = snapshot.gcs < fragmentation_threshold;
    snapshot.entropy = degree_entropy(&degrees);
    snapshot.scs = semantic_coherence(&snapshot.cluster_labels, node_embeddings);

    if let Some(prev) = previous {
        let unchanged = snapshot
            .cluster_labels
            .iter()
            .filter(|(node, label)| prev.cluster_labels.get(*node) == Some(*label))
            .count();
        snapshot.ccr = unchanged as f64 / total;
    }

    snapshot
}

/// `H = -Σ p log2 p` with `p = degree / Σ degrees`
pub fn degree_entropy(degrees: &[usize]) -> f64 {
    let sum: usize = degrees.iter().sum();
    if sum == 0 {
        return 0.0;
    }
    degrees
        .iter()
        .filter(|&&d| d > 0)
        .map(|&d| {
            let p = d as f64 / sum as f64;
            -p * p.log2()
        })
        .sum()
}

fn semantic_coherence(
    labels: &BTreeMap<String, String>,
    node_embeddings: &HashMap<String, Vec<f32>>,
) -> f64 {
    let mut clusters: BTreeMap<&str, Vec<&Vec<f32>>> = BTreeMap::new();
    for (node, label) in labels {
        if let Some(embedding) = node_embeddings.get(node) {
            clusters.entry(label.as_str()).or_default().push(embedding);
        }
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for members in clusters.values() {
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                total += cosine_similarity(a, b);
                pairs += 1;
            }
        }
    }

    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

/// Node embedding = mean embedding of the memories mentioning it
pub fn node_embeddings(graph: &KnowledgeGraph, memories: &[Memory]) -> HashMap<String, Vec<f32>> {
    let by_id: HashMap<_, _> = memories.iter().map(|m| (m.id, m)).collect();
    graph
        .nodes()
        .iter()
        .filter_map(|node| {
            let embeddings = node
                .sources
                .iter()
                .filter_map(|id| by_id.get(id).and_then(|m| m.embedding.as_ref()));
            mean_embedding(embeddings).map(|e| (node.id.clone(), e))
        })
        .collect()
}

pub struct StructureAnalyzer {
    store: Arc<MemoryStore>,
    graph_store: Arc<dyn GraphStore>,
    config: StructureConfig,
    backoff: Duration,
    latest: DashMap<String, Arc<StructureSnapshot>>,
    history: DashMap<String, VecDeque<Arc<StructureSnapshot>>>,
    graphs: DashMap<String, Arc<KnowledgeGraph>>,
}

impl StructureAnalyzer {
    pub fn new(
        store: Arc<MemoryStore>,
        graph_store: Arc<dyn GraphStore>,
        config: StructureConfig,
        storage_config: &StorageConfig,
    ) -> Self {
        Self {
            store,
            graph_store,
            config,
            backoff: Duration::from_millis(storage_config.retry_backoff_ms),
            latest: DashMap::new(),
            history: DashMap::new(),
            graphs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StructureConfig {
        &self.config
    }

    /// Rebuild the tenant's graph, publish it and take a snapshot
    pub async fn analyze_structure(&self, tenant_id: &str) -> Result<Arc<StructureSnapshot>> {
        let memories = self.store.query(&MemoryFilter::new(), tenant_id).await?;
        let graph = KnowledgeGraph::from_memories(tenant_id, &memories, self.config.min_entity_len);
        let embeddings = node_embeddings(&graph, &memories);

        let previous = self.latest(tenant_id);
        let snapshot = Arc::new(compute_snapshot(
            &graph,
            &embeddings,
            previous.as_deref(),
            self.config.fragmentation_threshold,
        ));

        self.publish(&graph).await?;

        self.graphs.insert(tenant_id.to_string(), Arc::new(graph));
        self.latest.insert(tenant_id.to_string(), snapshot.clone());
        {
            let mut history = self.history.entry(tenant_id.to_string()).or_default();
            history.push_back(snapshot.clone());
            while history.len() > self.config.history_len {
                history.pop_front();
            }
        }

        if snapshot.fragmented {
            tracing::warn!(tenant_id, gcs = snapshot.gcs, "Knowledge graph is fragmented");
        }
        tracing::debug!(
            tenant_id,
            nodes = snapshot.node_count,
            edges = snapshot.edge_count,
            gcs = snapshot.gcs,
            scs = snapshot.scs,
            entropy = snapshot.entropy,
            ccr = snapshot.ccr,
            "Structure snapshot taken"
        );
        Ok(snapshot)
    }

    async fn publish(&self, graph: &KnowledgeGraph) -> Result<()> {
        let tenant_id = graph.tenant_id();
        with_retry("graph.replace", self.backoff, || {
            self.graph_store
                .replace(tenant_id, graph.nodes().to_vec(), graph.edges().to_vec())
        })
        .await
    }

    pub fn latest(&self, tenant_id: &str) -> Option<Arc<StructureSnapshot>> {
        self.latest.get(tenant_id).map(|s| s.clone())
    }

    /// The snapshot before the latest one
    pub fn previous(&self, tenant_id: &str) -> Option<Arc<StructureSnapshot>> {
        let history = self.history.get(tenant_id)?;
        let len = history.len();
        if len < 2 { None } else { history.get(len - 2).cloned() }
    }

    pub fn history(&self, tenant_id: &str) -> Vec<Arc<StructureSnapshot>> {
        self.history
            .get(tenant_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn graph(&self, tenant_id: &str) -> Option<Arc<KnowledgeGraph>> {
        self.graphs.get(tenant_id).map(|g| g.clone())
    }
}
