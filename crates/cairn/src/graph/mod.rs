//! Knowledge graph derived from memories
//!
//! The graph is a cache, rebuildable at any time from the memory store.
//! Nodes and edges live in index-addressed tables; adjacency lists hold
//! node indices, so traversal and component search never chase pointers.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::memory::{Memory, MemoryId, MemoryType};
use crate::text;

pub const CO_OCCURS: &str = "co_occurs";

/// An entity extracted from one or more memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Normalised entity text, unique within a tenant
    pub id: String,
    pub tenant_id: String,
    pub label: String,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub importance: f64,
    /// Memories mentioning this entity
    pub sources: Vec<MemoryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub tenant_id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    /// Within [0, 1]
    pub confidence: f64,
}

/// Arena-backed undirected graph for one tenant
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    tenant_id: String,
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    edge_index: HashMap<(usize, usize), usize>,
    adjacency: Vec<Vec<usize>>,
}

impl KnowledgeGraph {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Build a graph from the entity co-occurrence of the given memories.
    /// Memories of other tenants are ignored.
    pub fn from_memories(tenant_id: &str, memories: &[Memory], min_entity_len: usize) -> Self {
        let mut graph = Self::new(tenant_id);
        let mut mentions: BTreeMap<String, Vec<&Memory>> = BTreeMap::new();
        let mut pair_counts: BTreeMap<(String, String), usize> = BTreeMap::new();

        for memory in memories.iter().filter(|m| m.tenant_id == tenant_id) {
            if !Self::is_extractable(memory) {
                continue;
            }
            let entities = text::extract_entities(&memory.content, &memory.tags, min_entity_len);
            for entity in &entities {
                mentions.entry(entity.clone()).or_default().push(memory);
            }
            let entities: Vec<&String> = entities.iter().collect();
            for (i, a) in entities.iter().enumerate() {
                for b in &entities[i + 1..] {
                    *pair_counts
                        .entry(((*a).clone(), (*b).clone()))
                        .or_insert(0) += 1;
                }
            }
        }

        for (entity, mentioning) in &mentions {
            let importance =
                mentioning.iter().map(|m| m.importance).sum::<f64>() / mentioning.len() as f64;
            let mut properties = BTreeMap::new();
            properties.insert("mentions".to_string(), serde_json::json!(mentioning.len()));
            graph.upsert_node(GraphNode {
                id: entity.clone(),
                tenant_id: tenant_id.to_string(),
                label: entity.clone(),
                properties,
                importance,
                sources: mentioning.iter().map(|m| m.id).collect(),
            });
        }

        for ((a, b), count) in pair_counts {
            let confidence = 1.0 - 1.0 / (1.0 + count as f64);
            graph.upsert_edge(&a, &b, CO_OCCURS, confidence);
        }

        graph
    }

    fn is_extractable(memory: &Memory) -> bool {
        matches!(
            memory.memory_type,
            MemoryType::Episodic | MemoryType::Semantic | MemoryType::Profile
        )
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Insert or replace a node, returning its index
    pub fn upsert_node(&mut self, node: GraphNode) -> usize {
        if let Some(&idx) = self.node_index.get(&node.id) {
            self.nodes[idx] = node;
            return idx;
        }
        let idx = self.nodes.len();
        self.node_index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        self.adjacency.push(Vec::new());
        idx
    }

    /// Insert or update an undirected edge. Returns false if either
    /// endpoint is unknown or the edge is a self-loop.
    pub fn upsert_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        confidence: f64,
    ) -> bool {
        let (Some(&a), Some(&b)) = (self.node_index.get(source_id), self.node_index.get(target_id))
        else {
            return false;
        };
        if a == b {
            return false;
        }

        let key = (a.min(b), a.max(b));
        let confidence = confidence.clamp(0.0, 1.0);
        if let Some(&e) = self.edge_index.get(&key) {
            self.edges[e].confidence = confidence;
            self.edges[e].relation_type = relation_type.to_string();
            return true;
        }

        self.edge_index.insert(key, self.edges.len());
        self.edges.push(GraphEdge {
            tenant_id: self.tenant_id.clone(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relation_type: relation_type.to_string(),
            confidence,
        });
        self.adjacency[a].push(b);
        self.adjacency[b].push(a);
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn degree(&self, id: &str) -> usize {
        self.node_index
            .get(id)
            .map(|&i| self.adjacency[i].len())
            .unwrap_or(0)
    }

    pub fn degrees(&self) -> Vec<usize> {
        self.adjacency.iter().map(Vec::len).collect()
    }

    /// Edge set as order-independent id pairs
    pub fn edge_keys(&self) -> BTreeSet<(String, String)> {
        self.edges
            .iter()
            .map(|e| {
                if e.source_id <= e.target_id {
                    (e.source_id.clone(), e.target_id.clone())
                } else {
                    (e.target_id.clone(), e.source_id.clone())
                }
            })
            .collect()
    }

    /// Connected components as lists of node indices
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();

        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for &m in &self.adjacency[n] {
                    if !seen[m] {
                        seen[m] = true;
                        component.push(m);
                        queue.push_back(m);
                    }
                }
            }
            components.push(component);
        }

        components
    }

    /// Node id -> cluster label, where a cluster is a connected component
    /// labelled by its smallest node id
    pub fn cluster_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for component in self.components() {
            let label = component
                .iter()
                .map(|&i| self.nodes[i].id.as_str())
                .min()
                .unwrap_or_default()
                .to_string();
            for &i in &component {
                labels.insert(self.nodes[i].id.clone(), label.clone());
            }
        }
        labels
    }

    /// Breadth-first traversal up to `depth` hops; start node at depth 0
    pub fn neighbors_within(&self, id: &str, depth: usize) -> Vec<(&GraphNode, usize)> {
        let Some(&start) = self.node_index.get(id) else {
            return Vec::new();
        };

        let mut dist: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);

        while let Some(n) = queue.pop_front() {
            let d = dist[&n];
            if d >= depth {
                continue;
            }
            for &m in &self.adjacency[n] {
                if !dist.contains_key(&m) {
                    dist.insert(m, d + 1);
                    order.push(m);
                    queue.push_back(m);
                }
            }
        }

        order.into_iter().map(|i| (&self.nodes[i], dist[&i])).collect()
    }
}
