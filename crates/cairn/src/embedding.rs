//! Embedding generation and vector helpers
//!
//! The engine does not pick an embedding model. Callers plug one in through
//! [`Embedder`]; [`HashingEmbedder`] is the in-process default, a feature
//! hashing model that makes texts sharing words land close together.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{CairnError, Result};
use crate::text;

/// Anything that turns text into a fixed-size vector
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Signed feature hashing over lowercased tokens, L2-normalised
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text::tokenize(input) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let index = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity in [-1, 1]; 0 for empty, mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Element-wise mean of equally sized vectors
pub fn mean_embedding<'a>(vectors: impl IntoIterator<Item = &'a Vec<f32>>) -> Option<Vec<f32>> {
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum: Vec<f64> = first.iter().map(|v| *v as f64).collect();
    let mut count = 1usize;

    for v in iter {
        if v.len() != sum.len() {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += *x as f64;
        }
        count += 1;
    }

    Some(sum.into_iter().map(|s| (s / count as f64) as f32).collect())
}

/// Reject embeddings whose size does not match the configured dimension
pub fn check_dimension(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(CairnError::Validation(format!(
            "embedding has dimension {}, expected {}",
            embedding.len(),
            expected
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(CairnError::Validation(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
