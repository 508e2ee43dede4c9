//! Weighted Reciprocal Rank Fusion

use std::collections::{BTreeMap, HashMap};

use crate::math::RetrievalWeights;
use crate::memory::{Memory, MemoryId};

use super::{RetrievalStrategy, ScoredMemory};

/// One strategy's ranked output, best first
#[derive(Debug, Clone)]
pub struct RankedList {
    pub strategy: RetrievalStrategy,
    pub memories: Vec<Memory>,
}

impl RankedList {
    pub fn new(strategy: RetrievalStrategy, memories: Vec<Memory>) -> Self {
        Self { strategy, memories }
    }
}

pub fn strategy_weight(weights: &RetrievalWeights, strategy: RetrievalStrategy) -> f64 {
    match strategy {
        RetrievalStrategy::Vector => weights.vector,
        RetrievalStrategy::Graph => weights.graph,
        RetrievalStrategy::Sparse => weights.sparse,
        RetrievalStrategy::FullText => weights.fulltext,
    }
}

/// `score(m) = Σ_s weight_s / (k + rank_s(m))`, ranks starting at 1.
/// Ties break on importance (descending) then id (ascending), so equal
/// inputs always fuse to the same order.
pub fn fuse(lists: &[RankedList], weights: &RetrievalWeights, k: f64) -> Vec<ScoredMemory> {
    let mut fused: HashMap<MemoryId, ScoredMemory> = HashMap::new();

    for list in lists {
        let weight = strategy_weight(weights, list.strategy);
        for (i, memory) in list.memories.iter().enumerate() {
            let rank = i + 1;
            let entry = fused.entry(memory.id).or_insert_with(|| ScoredMemory {
                memory: memory.clone(),
                score: 0.0,
                ranks: BTreeMap::new(),
            });
            // A strategy that lists a memory twice only counts its best rank
            if entry.ranks.contains_key(&list.strategy) {
                continue;
            }
            entry.ranks.insert(list.strategy, rank);
            entry.score += weight / (k + rank as f64);
        }
    }

    let mut results: Vec<ScoredMemory> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.memory.importance.total_cmp(&a.memory.importance))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    results
}
