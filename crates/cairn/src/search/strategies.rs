//! The four retrieval strategies. Each returns the tenant's memories only,
//! best first; tenant scoping happens here, before any fusion.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::math::policy::query_seeds;
use crate::memory::{Memory, MemoryFilter, MemoryId, MemoryStore};
use crate::storage::GraphStore;
use crate::text;

use super::bm25::Bm25;

/// Live memories of the tenant that pass the filter
async fn candidates(store: &MemoryStore, filter: &MemoryFilter, tenant_id: &str) -> Result<Vec<Memory>> {
    let now = Utc::now();
    Ok(store
        .query(filter, tenant_id)
        .await?
        .into_iter()
        .filter(|m| !m.is_expired(now))
        .collect())
}

/// Sort by score desc, importance desc, id asc and drop non-positive scores
fn rank(mut scored: Vec<(Memory, f64)>, limit: usize) -> Vec<Memory> {
    scored.retain(|(_, s)| *s > 0.0);
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then_with(|| b.importance.total_cmp(&a.importance))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.into_iter().take(limit).map(|(m, _)| m).collect()
}

/// Fetch ids through the tenant-scoped store, keeping order
async fn fetch(
    store: &MemoryStore,
    ids: Vec<MemoryId>,
    filter: &MemoryFilter,
    tenant_id: &str,
) -> Result<Vec<Memory>> {
    let now = Utc::now();
    let mut found = Vec::new();
    for id in ids {
        if let Some(memory) = store.get(id, tenant_id).await? {
            if filter.matches(&memory) && !memory.is_expired(now) {
                found.push(memory);
            }
        }
    }
    Ok(found)
}

/// Nearest neighbours of the query embedding
pub async fn vector(
    store: &MemoryStore,
    query: &str,
    filter: &MemoryFilter,
    tenant_id: &str,
    config: &SearchConfig,
) -> Result<Vec<Memory>> {
    let embedding = store.embedder().embed(query)?;
    // Over-fetch so post-filtering still leaves enough candidates
    let k = config.candidates_per_strategy * 2;
    let hits = store
        .vectors()
        .search(&embedding, k, tenant_id)
        .await?;
    let ids = hits.into_iter().map(|(id, _)| id).collect();
    let mut found = fetch(store, ids, filter, tenant_id).await?;
    found.truncate(config.candidates_per_strategy);
    Ok(found)
}

/// BM25 over the tenant's memory contents
pub async fn sparse(
    store: &MemoryStore,
    query: &str,
    filter: &MemoryFilter,
    tenant_id: &str,
    config: &SearchConfig,
) -> Result<Vec<Memory>> {
    let terms = text::content_terms(query, 2);
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let memories = candidates(store, filter, tenant_id).await?;
    let docs: Vec<Vec<String>> = memories
        .iter()
        .map(|m| text::content_terms(&m.content, 2))
        .collect();
    let scores = Bm25::new(config.bm25_k1, config.bm25_b).score_all(&terms, &docs);
    Ok(rank(
        memories.into_iter().zip(scores).collect(),
        config.candidates_per_strategy,
    ))
}

/// Share of distinct query terms present, plus a bonus per exact phrase
pub fn fulltext_score(query: &str, content: &str, phrase_bonus: f64) -> f64 {
    let terms: BTreeSet<String> = text::content_terms(query, 1).into_iter().collect();
    let lowered = content.to_lowercase();

    let mut phrases = text::quoted_phrases(query);
    if phrases.is_empty() && terms.len() > 1 {
        phrases.push(text::tokenize(query).join(" "));
    }
    let normalized: String = text::tokenize(&lowered).join(" ");
    let phrase_hits = phrases
        .iter()
        .filter(|p| !p.is_empty() && (lowered.contains(p.as_str()) || normalized.contains(p.as_str())))
        .count();

    if terms.is_empty() {
        return phrase_bonus * phrase_hits as f64;
    }
    let tokens = text::tokenize(content);
    let present = text::distinct(&tokens);
    let matched = terms.iter().filter(|t| present.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64 + phrase_bonus * phrase_hits as f64
}

/// Term and phrase matching over the tenant's memory contents
pub async fn fulltext(
    store: &MemoryStore,
    query: &str,
    filter: &MemoryFilter,
    tenant_id: &str,
    config: &SearchConfig,
) -> Result<Vec<Memory>> {
    let memories = candidates(store, filter, tenant_id).await?;
    let scored = memories
        .into_iter()
        .map(|m| {
            let score = fulltext_score(query, &m.content, config.phrase_bonus);
            (m, score)
        })
        .collect();
    Ok(rank(scored, config.candidates_per_strategy))
}

/// Traverse the tenant's graph from the query's seed entities and rank
/// memories by `Σ 1 / (1 + depth)` over the nodes that reference them
pub async fn graph(
    store: &MemoryStore,
    graph_store: &dyn GraphStore,
    query: &str,
    filter: &MemoryFilter,
    tenant_id: &str,
    config: &SearchConfig,
) -> Result<Vec<Memory>> {
    let seeds = query_seeds(query, config.max_seeds);
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let mut scores: HashMap<MemoryId, f64> = HashMap::new();
    for seed in &seeds {
        let reached = graph_store
            .neighbors(tenant_id, seed, config.graph_depth)
            .await?;
        for (node, depth) in reached {
            if node.tenant_id != tenant_id {
                tracing::warn!(
                    tenant_id,
                    node_tenant = %node.tenant_id,
                    node_id = %node.id,
                    "Ignoring foreign graph node"
                );
                continue;
            }
            for source in &node.sources {
                *scores.entry(*source).or_insert(0.0) += 1.0 / (1.0 + depth as f64);
            }
        }
    }

    let mut ids: Vec<(MemoryId, f64)> = scores.into_iter().collect();
    ids.sort_by(|a, b| a.0.cmp(&b.0));
    let ordered = ids.iter().map(|(id, _)| *id).collect();
    let found = fetch(store, ordered, filter, tenant_id).await?;
    let score_of: HashMap<MemoryId, f64> = ids.into_iter().collect();
    let scored = found
        .into_iter()
        .map(|m| {
            let score = score_of.get(&m.id).copied().unwrap_or(0.0);
            (m, score)
        })
        .collect();
    Ok(rank(scored, config.candidates_per_strategy))
}
