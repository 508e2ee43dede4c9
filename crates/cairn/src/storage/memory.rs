//! In-process reference backends built on `DashMap`

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CasOutcome, GraphStore, MemoryStorage, StorageResult, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::graph::{GraphEdge, GraphNode};
use crate::memory::{Memory, MemoryFilter, MemoryId};

/// Memory records keyed by id; tenant scoping is checked on every access
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    memories: DashMap<MemoryId, Memory>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Distinct tenant ids with at least one memory, sorted
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.memories.iter().map(|m| m.tenant_id.clone()).collect();
        tenants.sort();
        tenants.dedup();
        tenants
    }
}

#[async_trait]
impl MemoryStorage for InMemoryStorage {
    async fn put(&self, memory: Memory) -> StorageResult<()> {
        self.memories.insert(memory.id, memory);
        Ok(())
    }

    async fn get(&self, id: MemoryId, tenant_id: &str) -> StorageResult<Option<Memory>> {
        Ok(self
            .memories
            .get(&id)
            .filter(|m| m.tenant_id == tenant_id)
            .map(|m| m.clone()))
    }

    async fn query(&self, filter: &MemoryFilter, tenant_id: &str) -> StorageResult<Vec<Memory>> {
        let mut found: Vec<Memory> = self
            .memories
            .iter()
            .filter(|m| m.tenant_id == tenant_id && filter.matches(m))
            .map(|m| m.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete(&self, id: MemoryId, tenant_id: &str) -> StorageResult<bool> {
        Ok(self
            .memories
            .remove_if(&id, |_, m| m.tenant_id == tenant_id)
            .is_some())
    }

    async fn compare_and_swap(
        &self,
        mut memory: Memory,
        expected_version: u64,
    ) -> StorageResult<CasOutcome> {
        let Some(mut current) = self.memories.get_mut(&memory.id) else {
            return Ok(CasOutcome::Missing);
        };
        if current.tenant_id != memory.tenant_id {
            return Ok(CasOutcome::Missing);
        }
        if current.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        memory.version = expected_version + 1;
        *current = memory;
        Ok(CasOutcome::Swapped)
    }
}

/// Brute-force cosine index partitioned by tenant
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    vectors: DashMap<String, HashMap<MemoryId, Vec<f32>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: MemoryId, tenant_id: &str, embedding: &[f32]) -> StorageResult<()> {
        self.vectors
            .entry(tenant_id.to_string())
            .or_default()
            .insert(id, embedding.to_vec());
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        tenant_id: &str,
    ) -> StorageResult<Vec<(MemoryId, f64)>> {
        let Some(partition) = self.vectors.get(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(MemoryId, f64)> = partition
            .iter()
            .map(|(id, v)| (*id, 1.0 - cosine_similarity(embedding, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove(&self, id: MemoryId, tenant_id: &str) -> StorageResult<()> {
        if let Some(mut partition) = self.vectors.get_mut(tenant_id) {
            partition.remove(&id);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TenantGraph {
    nodes: HashMap<String, GraphNode>,
    adjacency: HashMap<String, HashSet<String>>,
}

/// Graph store partitioned by tenant
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graphs: DashMap<String, TenantGraph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, tenant_id: &str, node: GraphNode) -> StorageResult<()> {
        let mut graph = self.graphs.entry(tenant_id.to_string()).or_default();
        graph.adjacency.entry(node.id.clone()).or_default();
        graph.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn upsert_edge(&self, tenant_id: &str, edge: GraphEdge) -> StorageResult<()> {
        let mut graph = self.graphs.entry(tenant_id.to_string()).or_default();
        graph
            .adjacency
            .entry(edge.source_id.clone())
            .or_default()
            .insert(edge.target_id.clone());
        graph
            .adjacency
            .entry(edge.target_id)
            .or_default()
            .insert(edge.source_id);
        Ok(())
    }

    async fn neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
        depth: usize,
    ) -> StorageResult<Vec<(GraphNode, usize)>> {
        let Some(graph) = self.graphs.get(tenant_id) else {
            return Ok(Vec::new());
        };
        if !graph.nodes.contains_key(node_id) {
            return Ok(Vec::new());
        }

        let mut dist: HashMap<&str, usize> = HashMap::from([(node_id, 0)]);
        let mut queue = VecDeque::from([node_id]);
        let mut reached = Vec::new();

        while let Some(current) = queue.pop_front() {
            let d = dist[current];
            if let Some(node) = graph.nodes.get(current) {
                reached.push((node.clone(), d));
            }
            if d >= depth {
                continue;
            }
            let mut next: Vec<&str> = graph
                .adjacency
                .get(current)
                .map(|s| s.iter().map(String::as_str).collect())
                .unwrap_or_default();
            next.sort_unstable();
            for n in next {
                if !dist.contains_key(n) {
                    dist.insert(n, d + 1);
                    queue.push_back(n);
                }
            }
        }

        Ok(reached)
    }

    async fn replace(
        &self,
        tenant_id: &str,
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
    ) -> StorageResult<()> {
        let mut graph = TenantGraph::default();
        for node in nodes {
            graph.adjacency.entry(node.id.clone()).or_default();
            graph.nodes.insert(node.id.clone(), node);
        }
        for edge in edges {
            graph
                .adjacency
                .entry(edge.source_id.clone())
                .or_default()
                .insert(edge.target_id.clone());
            graph
                .adjacency
                .entry(edge.target_id)
                .or_default()
                .insert(edge.source_id);
        }
        self.graphs.insert(tenant_id.to_string(), graph);
        Ok(())
    }
}
