//! Evaluators label outcomes as success, failure or neutral. Which one
//! runs is chosen by configuration; the actor and reflector only see the
//! trait.

use std::sync::Arc;

use crate::config::{EvaluatorKind, ReflectionConfig};

use super::quality::{QualityScorer, QualitySubject};
use super::types::{EvaluationLabel, Outcome};

pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, outcome: &Outcome) -> EvaluationLabel;
}

fn label_from_signal(outcome: &Outcome) -> EvaluationLabel {
    match outcome.success {
        Some(true) => EvaluationLabel::Success,
        Some(false) => EvaluationLabel::Failure,
        None => EvaluationLabel::Neutral,
    }
}

fn label_from_score(score: f64, success_threshold: f64, failure_threshold: f64) -> EvaluationLabel {
    if score >= success_threshold {
        EvaluationLabel::Success
    } else if score <= failure_threshold {
        EvaluationLabel::Failure
    } else {
        EvaluationLabel::Neutral
    }
}

/// Trusts the outcome's explicit success signal
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicEvaluator;

impl Evaluator for DeterministicEvaluator {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn evaluate(&self, outcome: &Outcome) -> EvaluationLabel {
        label_from_signal(outcome)
    }
}

/// Compares the outcome's score against success/failure thresholds,
/// falling back to the success signal when no score was supplied
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator {
    pub success_threshold: f64,
    pub failure_threshold: f64,
}

impl Evaluator for ThresholdEvaluator {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn evaluate(&self, outcome: &Outcome) -> EvaluationLabel {
        match outcome.score {
            Some(score) if score.is_finite() => {
                label_from_score(score, self.success_threshold, self.failure_threshold)
            }
            _ => label_from_signal(outcome),
        }
    }
}

/// Scores the result text with a [`QualityScorer`]. An explicit failure
/// signal always wins.
pub struct ScorerEvaluator {
    scorer: QualityScorer,
    success_threshold: f64,
    failure_threshold: f64,
}

impl ScorerEvaluator {
    pub fn new(scorer: QualityScorer, success_threshold: f64, failure_threshold: f64) -> Self {
        Self {
            scorer,
            success_threshold,
            failure_threshold,
        }
    }
}

impl Evaluator for ScorerEvaluator {
    fn name(&self) -> &'static str {
        "scorer"
    }

    fn evaluate(&self, outcome: &Outcome) -> EvaluationLabel {
        if outcome.success == Some(false) {
            return EvaluationLabel::Failure;
        }
        let report = self.scorer.evaluate(&QualitySubject::from_outcome(outcome));
        tracing::debug!(outcome_id = %outcome.id, score = report.score, "Scored outcome");
        label_from_score(report.score, self.success_threshold, self.failure_threshold)
    }
}

pub fn evaluator_from_config(config: &ReflectionConfig) -> Arc<dyn Evaluator> {
    match config.evaluator {
        EvaluatorKind::Deterministic => Arc::new(DeterministicEvaluator),
        EvaluatorKind::Threshold => Arc::new(ThresholdEvaluator {
            success_threshold: config.success_threshold,
            failure_threshold: config.failure_threshold,
        }),
        EvaluatorKind::Scorer => Arc::new(ScorerEvaluator::new(
            QualityScorer::default(),
            config.success_threshold,
            config.failure_threshold,
        )),
    }
}
