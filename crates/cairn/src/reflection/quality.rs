//! Text quality metrics backing the scorer evaluator

use std::collections::BTreeMap;

use crate::memory::Memory;
use crate::text;

use super::types::Outcome;

/// What a metric looks at
#[derive(Debug, Clone, Default)]
pub struct QualitySubject<'a> {
    pub text: &'a str,
    /// Query or task the text should be relevant to
    pub context: Option<&'a str>,
    /// Presence flags for the fields a complete subject must have
    pub required: Vec<bool>,
    /// Presence flags for nice-to-have fields
    pub optional: Vec<bool>,
}

impl<'a> QualitySubject<'a> {
    pub fn from_memory(memory: &'a Memory, context: Option<&'a str>) -> Self {
        Self {
            text: &memory.content,
            context,
            required: vec![!memory.content.trim().is_empty()],
            optional: vec![
                !memory.tags.is_empty(),
                !memory.metadata.is_empty(),
                memory.importance > 0.0,
            ],
        }
    }

    pub fn from_outcome(outcome: &'a Outcome) -> Self {
        Self {
            text: &outcome.result,
            context: Some(&outcome.action),
            required: vec![
                !outcome.action.trim().is_empty(),
                !outcome.result.trim().is_empty(),
            ],
            optional: vec![
                outcome.success.is_some(),
                outcome.score.is_some(),
                outcome.session_id.is_some(),
            ],
        }
    }
}

pub trait QualityMetric: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score in [0, 1], or None when the metric does not apply
    fn compute(&self, subject: &QualitySubject<'_>) -> Option<f64>;
}

/// Heuristic sentence structure: length, punctuation, capitalisation
pub struct TextCoherence;

impl QualityMetric for TextCoherence {
    fn name(&self) -> &'static str {
        "text_coherence"
    }

    fn compute(&self, subject: &QualitySubject<'_>) -> Option<f64> {
        let text = subject.text.trim();
        if text.is_empty() {
            return Some(0.0);
        }
        let words = text.split_whitespace().count();
        if words < 3 {
            return Some(0.2);
        }
        let mut score: f64 = 0.5;
        if words > 5 {
            score += 0.2;
        }
        if text.contains(['.', '!', '?']) {
            score += 0.1;
        }
        if text.chars().next().is_some_and(char::is_uppercase) {
            score += 0.1;
        }
        Some(score.min(1.0))
    }
}

/// Shannon entropy of the tokens, normalised by its maximum
pub struct TokenEntropy;

impl QualityMetric for TokenEntropy {
    fn name(&self) -> &'static str {
        "token_entropy"
    }

    fn compute(&self, subject: &QualitySubject<'_>) -> Option<f64> {
        let tokens = text::tokenize(subject.text);
        if tokens.is_empty() {
            return Some(0.0);
        }
        let unique = text::distinct(&tokens).len();
        let max = if unique > 1 { (unique as f64).log2() } else { 1.0 };
        Some((text::token_entropy(&tokens) / max).clamp(0.0, 1.0))
    }
}

/// Share of context words that appear in the text
pub struct KeywordRelevance;

impl QualityMetric for KeywordRelevance {
    fn name(&self) -> &'static str {
        "keyword_relevance"
    }

    fn compute(&self, subject: &QualitySubject<'_>) -> Option<f64> {
        let context = subject.context?;
        let wanted = text::content_terms(context, 1);
        if wanted.is_empty() {
            return None;
        }
        let tokens = text::tokenize(subject.text);
        let present = text::distinct(&tokens);
        let wanted = text::distinct(&wanted);
        let overlap = wanted.iter().filter(|w| present.contains(*w)).count();
        Some((overlap as f64 / wanted.len() as f64).min(1.0))
    }
}

/// Required fields count 70%, optional fields 30%
pub struct Completeness;

impl QualityMetric for Completeness {
    fn name(&self) -> &'static str {
        "completeness"
    }

    fn compute(&self, subject: &QualitySubject<'_>) -> Option<f64> {
        let share = |flags: &[bool]| {
            if flags.is_empty() {
                1.0
            } else {
                flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
            }
        };
        Some(share(&subject.required) * 0.7 + share(&subject.optional) * 0.3)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub score: f64,
    pub details: BTreeMap<&'static str, f64>,
}

/// Weighted mean of the applicable metrics
pub struct QualityScorer {
    metrics: Vec<(Box<dyn QualityMetric>, f64)>,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(vec![
            (Box::new(TextCoherence) as Box<dyn QualityMetric>, 1.0),
            (Box::new(TokenEntropy) as Box<dyn QualityMetric>, 1.0),
            (Box::new(KeywordRelevance) as Box<dyn QualityMetric>, 1.0),
            (Box::new(Completeness) as Box<dyn QualityMetric>, 1.0),
        ])
    }
}

impl QualityScorer {
    pub fn new(metrics: Vec<(Box<dyn QualityMetric>, f64)>) -> Self {
        Self {
            metrics: metrics
                .into_iter()
                .filter(|(_, w)| w.is_finite() && *w > 0.0)
                .collect(),
        }
    }

    pub fn evaluate(&self, subject: &QualitySubject<'_>) -> QualityReport {
        let mut details = BTreeMap::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (metric, weight) in &self.metrics {
            if let Some(score) = metric.compute(subject) {
                details.insert(metric.name(), score);
                weighted += score * weight;
                total_weight += weight;
            }
        }
        let score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        QualityReport { score, details }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(text: &str) -> QualitySubject<'_> {
        QualitySubject {
            text,
            ..Default::default()
        }
    }

    #[test]
    fn test_coherence_heuristics() {
        assert_eq!(TextCoherence.compute(&subject("")), Some(0.0));
        assert_eq!(TextCoherence.compute(&subject("too short")), Some(0.2));
        let full = TextCoherence
            .compute(&subject("The deploy finished without any errors today."))
            .unwrap();
        assert!((full - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_entropy_normalised() {
        assert_eq!(TokenEntropy.compute(&subject("same same same")), Some(0.0));
        let varied = TokenEntropy.compute(&subject("alpha beta gamma delta")).unwrap();
        assert!((varied - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_needs_context() {
        assert_eq!(KeywordRelevance.compute(&subject("anything")), None);
        let s = QualitySubject {
            text: "restarted the database cluster",
            context: Some("database restart"),
            ..Default::default()
        };
        assert_eq!(KeywordRelevance.compute(&s), Some(0.5));
    }

    #[test]
    fn test_scorer_skips_inapplicable_metrics() {
        let scorer = QualityScorer::default();
        let report = scorer.evaluate(&subject("The deploy finished without any errors today."));
        assert!(!report.details.contains_key("keyword_relevance"));
        assert_eq!(report.details.len(), 3);
        assert!(report.score > 0.0 && report.score <= 1.0);
    }

    #[test]
    fn test_outcome_completeness() {
        let outcome = Outcome::new("t1", "deploy", "push release", "release is live").succeeded(true);
        let s = QualitySubject::from_outcome(&outcome);
        let score = Completeness.compute(&s).unwrap();
        assert!((score - (0.7 + 0.1)).abs() < 1e-9);
    }
}
