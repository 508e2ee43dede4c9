//! Actor-Evaluator-Reflector pipeline
//!
//! Per outcome: `PENDING_EVALUATION -> EVALUATED -> {REFLECTION_SKIPPED |
//! REFLECTION_TRIGGERED} -> {REFLECTED | REFLECTION_FAILED}`.

pub mod actor;
pub mod evaluator;
pub mod insight;
pub mod ledger;
pub mod quality;
pub mod reflector;
pub mod types;

pub use actor::Actor;
pub use evaluator::{
    DeterministicEvaluator, Evaluator, ScorerEvaluator, ThresholdEvaluator, evaluator_from_config,
};
pub use insight::{
    GatewayInsightGenerator, Insight, InsightGenerator, InsightRequest, TemplateInsightGenerator,
};
pub use ledger::ReflectionLedger;
pub use quality::{QualityMetric, QualityScorer, QualitySubject};
pub use reflector::Reflector;
pub use types::{EvaluationLabel, Outcome, ReflectionRecord, ReflectionState};
