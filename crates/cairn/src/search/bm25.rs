//! Okapi BM25 over an ad-hoc document set

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    pub k1: f64,
    pub b: f64,
}

impl Bm25 {
    pub fn new(k1: f64, b: f64) -> Self {
        Self { k1, b }
    }

    /// Score every document against the query terms. Documents are
    /// pre-tokenised; the returned scores line up with `docs`.
    pub fn score_all(&self, query_terms: &[String], docs: &[Vec<String>]) -> Vec<f64> {
        if docs.is_empty() || query_terms.is_empty() {
            return vec![0.0; docs.len()];
        }

        let n = docs.len() as f64;
        let avg_len = docs.iter().map(Vec::len).sum::<usize>() as f64 / n;
        let query: HashSet<&str> = query_terms.iter().map(String::as_str).collect();

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in docs {
            let seen: HashSet<&str> = doc
                .iter()
                .map(String::as_str)
                .filter(|t| query.contains(t))
                .collect();
            for term in seen {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let idf = |term: &str| -> f64 {
            let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
            (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
        };

        docs.iter()
            .map(|doc| {
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for term in doc.iter().map(String::as_str).filter(|t| query.contains(t)) {
                    *tf.entry(term).or_insert(0) += 1;
                }
                let len_norm = if avg_len > 0.0 {
                    1.0 - self.b + self.b * doc.len() as f64 / avg_len
                } else {
                    1.0
                };
                query
                    .iter()
                    .map(|term| {
                        let f = tf.get(term).copied().unwrap_or(0) as f64;
                        if f == 0.0 {
                            0.0
                        } else {
                            idf(term) * f * (self.k1 + 1.0) / (f + self.k1 * len_norm)
                        }
                    })
                    .sum()
            })
            .collect()
    }
}
