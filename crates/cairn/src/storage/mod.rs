//! Pluggable persistence interfaces
//!
//! The engine consumes these contracts and never assumes a concrete
//! backend. [`memory`] holds the in-process reference implementations and
//! [`retry`] the retry-once policy every backend call goes through.

pub mod memory;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::CairnError;
use crate::graph::{GraphEdge, GraphNode};
use crate::memory::{Memory, MemoryFilter, MemoryId};

pub use memory::{InMemoryGraphStore, InMemoryStorage, InMemoryVectorIndex};
pub use retry::with_retry;

/// Errors reported by a storage, vector or graph backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for CairnError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => CairnError::StorageUnavailable(msg),
            StorageError::NotFound(msg) => CairnError::NotFound(msg),
        }
    }
}

/// Result of a versioned write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; the stored version is now `expected + 1`
    Swapped,
    /// Someone else wrote first
    Conflict,
    /// No such memory for this tenant
    Missing,
}

/// Memory record storage. Every call is tenant-scoped.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    async fn put(&self, memory: Memory) -> StorageResult<()>;

    async fn get(&self, id: MemoryId, tenant_id: &str) -> StorageResult<Option<Memory>>;

    async fn query(&self, filter: &MemoryFilter, tenant_id: &str) -> StorageResult<Vec<Memory>>;

    async fn delete(&self, id: MemoryId, tenant_id: &str) -> StorageResult<bool>;

    /// Replace the stored memory only if its version still equals
    /// `expected_version`.
    async fn compare_and_swap(
        &self,
        memory: Memory,
        expected_version: u64,
    ) -> StorageResult<CasOutcome>;
}

/// Nearest-neighbour index over memory embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: MemoryId, tenant_id: &str, embedding: &[f32]) -> StorageResult<()>;

    /// Up to `k` ids of the tenant, nearest first, with cosine distance
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        tenant_id: &str,
    ) -> StorageResult<Vec<(MemoryId, f64)>>;

    async fn remove(&self, id: MemoryId, tenant_id: &str) -> StorageResult<()>;
}

/// Store for the derived knowledge graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, tenant_id: &str, node: GraphNode) -> StorageResult<()>;

    async fn upsert_edge(&self, tenant_id: &str, edge: GraphEdge) -> StorageResult<()>;

    /// Nodes reachable from `node_id` within `depth` hops, with their
    /// hop distance. The start node is included at depth 0.
    async fn neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
        depth: usize,
    ) -> StorageResult<Vec<(GraphNode, usize)>>;

    /// Swap in a rebuilt graph for the tenant. Readers see either the
    /// old graph or the new one, never a partial rebuild.
    async fn replace(
        &self,
        tenant_id: &str,
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
    ) -> StorageResult<()>;
}
