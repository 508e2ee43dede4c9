//! Extractive consolidation of session memories
//!
//! A session's working and episodic memories are folded into one summary:
//! the most important sentences, a keyword line, the mean embedding, and
//! the mean importance plus a configurable bonus.

use std::collections::{BTreeSet, HashSet};

use crate::config::LifecycleConfig;
use crate::embedding::mean_embedding;
use crate::memory::types::{Memory, MemoryId};
use crate::text;

pub const CONSOLIDATED_TAG: &str = "consolidated";

const KEYWORD_MIN_LEN: usize = 4;

/// The content of a consolidated memory before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationSummary {
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub importance: f64,
    pub tags: BTreeSet<String>,
    pub source_ids: Vec<MemoryId>,
}

/// Summarise sources; `None` when there is nothing to consolidate
pub fn summarize(sources: &[Memory], config: &LifecycleConfig) -> Option<ConsolidationSummary> {
    if sources.is_empty() {
        return None;
    }

    // (importance, position, sentence) so equal importance keeps source order
    let mut ranked: Vec<(f64, usize, String)> = Vec::new();
    for memory in sources {
        for sentence in text::sentences(&memory.content) {
            ranked.push((memory.importance, ranked.len(), sentence));
        }
    }
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut seen = HashSet::new();
    let picked: Vec<String> = ranked
        .into_iter()
        .filter(|(_, _, s)| seen.insert(s.to_lowercase()))
        .take(config.max_summary_sentences.max(1))
        .map(|(_, _, s)| s)
        .collect();

    let all_text = sources
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let keywords = text::keywords(&all_text, KEYWORD_MIN_LEN, config.max_keywords);

    let mut content = if picked.is_empty() {
        String::new()
    } else {
        picked.join(". ") + "."
    };
    if !keywords.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("Keywords: ");
        content.push_str(&keywords.join(", "));
    }

    let mean_importance = sources.iter().map(|m| m.importance).sum::<f64>() / sources.len() as f64;
    let importance = (mean_importance + config.consolidation_bonus).clamp(0.0, 1.0);

    let mut tags: BTreeSet<String> = sources.iter().flat_map(|m| m.tags.iter().cloned()).collect();
    tags.insert(CONSOLIDATED_TAG.to_string());

    Some(ConsolidationSummary {
        content,
        embedding: mean_embedding(sources.iter().filter_map(|m| m.embedding.as_ref())),
        importance,
        tags,
        source_ids: sources.iter().map(|m| m.id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Layer, MemoryType};

    fn source(content: &str, importance: f64, embedding: Option<Vec<f32>>) -> Memory {
        let mut m = Memory::new("t1", Layer::Working, MemoryType::Episodic, content);
        m.importance = importance;
        m.embedding = embedding;
        m.tags.insert("session".to_string());
        m
    }

    #[test]
    fn test_empty_sources() {
        assert!(summarize(&[], &LifecycleConfig::default()).is_none());
    }

    #[test]
    fn test_summary_prefers_important_sentences() {
        let config = LifecycleConfig {
            max_summary_sentences: 2,
            ..Default::default()
        };
        let sources = vec![
            source("Minor detail about lunch.", 0.1, None),
            source("Database migration failed. Rollback succeeded.", 0.9, None),
        ];

        let summary = summarize(&sources, &config).unwrap();
        assert!(summary
            .content
            .starts_with("Database migration failed. Rollback succeeded."));
        assert!(!summary.content.contains("lunch."));
        assert!(summary.content.contains("Keywords: "));
    }

    #[test]
    fn test_importance_and_embedding() {
        let config = LifecycleConfig::default();
        let sources = vec![
            source("One.", 0.4, Some(vec![1.0, 0.0])),
            source("Two.", 0.6, Some(vec![0.0, 1.0])),
        ];

        let summary = summarize(&sources, &config).unwrap();
        assert!((summary.importance - 0.6).abs() < 1e-12);
        assert_eq!(summary.embedding, Some(vec![0.5, 0.5]));
        assert_eq!(summary.source_ids.len(), 2);
        assert!(summary.tags.contains(CONSOLIDATED_TAG));
        assert!(summary.tags.contains("session"));
    }

    #[test]
    fn test_importance_is_clamped() {
        let config = LifecycleConfig {
            consolidation_bonus: 0.5,
            ..Default::default()
        };
        let summary = summarize(&[source("Hot.", 0.9, None)], &config).unwrap();
        assert_eq!(summary.importance, 1.0);
    }

    #[test]
    fn test_duplicate_sentences_collapse() {
        let config = LifecycleConfig::default();
        let sources = vec![source("Retry the job.", 0.5, None), source("retry the job", 0.5, None)];
        let summary = summarize(&sources, &config).unwrap();
        assert_eq!(summary.content.matches("etry the job").count(), 1);
    }
}
