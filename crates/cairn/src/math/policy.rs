//! Policy optimizer
//!
//! Turns structure and dynamics metrics plus budget state into decisions:
//! how to weight the retrieval strategies, how much effort to spend on a
//! reflection, and when to prune. Its only side effects are budget debits
//! for costed decisions and an entry in the bounded audit log.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::math::budget::{BudgetLedger, BudgetStatus};
use crate::math::dynamics::{DynamicsSnapshot, ReflectionHistory};
use crate::math::structure::StructureSnapshot;
use crate::reflection::EvaluationLabel;
use crate::text;

/// Relative weight of each retrieval strategy; sums to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalWeights {
    pub vector: f64,
    pub graph: f64,
    pub sparse: f64,
    pub fulltext: f64,
}

impl RetrievalWeights {
    pub fn new(vector: f64, graph: f64, sparse: f64, fulltext: f64) -> Self {
        Self {
            vector,
            graph,
            sparse,
            fulltext,
        }
    }

    pub fn sum(&self) -> f64 {
        self.vector + self.graph + self.sparse + self.fulltext
    }

    /// Scale to sum 1; all-zero or invalid weights become uniform
    pub fn normalized(self) -> Self {
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let w = Self::new(
            clean(self.vector),
            clean(self.graph),
            clean(self.sparse),
            clean(self.fulltext),
        );
        let sum = w.sum();
        if sum <= 0.0 {
            return Self::new(0.25, 0.25, 0.25, 0.25);
        }
        Self::new(w.vector / sum, w.graph / sum, w.sparse / sum, w.fulltext / sum)
    }
}

/// What the optimizer knows about a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFeatures {
    /// Entities and keywords usable as graph seeds
    pub seeds: Vec<String>,
    pub has_quoted_phrase: bool,
    /// GCS restricted to the query's seeds
    pub topic_gcs: Option<f64>,
    /// GCS of the whole graph
    pub global_gcs: Option<f64>,
}

impl QueryFeatures {
    pub fn from_query(query: &str, structure: Option<&StructureSnapshot>, max_seeds: usize) -> Self {
        let seeds = query_seeds(query, max_seeds);
        Self {
            topic_gcs: structure.and_then(|s| s.topic_gcs(&seeds)),
            global_gcs: structure.filter(|s| !s.insufficient_data).map(|s| s.gcs),
            has_quoted_phrase: !text::quoted_phrases(query).is_empty(),
            seeds,
        }
    }
}

/// Entities first, then keywords, deduplicated and capped
pub fn query_seeds(query: &str, max_seeds: usize) -> Vec<String> {
    let mut seeds: Vec<String> = text::extract_entities(query, std::iter::empty(), 3).into_iter().collect();
    for keyword in text::keywords(query, 3, max_seeds) {
        if !seeds.contains(&keyword) {
            seeds.push(keyword);
        }
    }
    seeds.truncate(max_seeds);
    seeds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionMode {
    /// Model-backed reflection
    Full,
    /// Template-based reflection, no model call
    Lite,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", content = "value", rename_all = "snake_case")]
pub enum DecisionTarget {
    RetrievalWeights(RetrievalWeights),
    ReflectionMode(ReflectionMode),
    PruneTrigger(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub tenant_id: String,
    pub target: DecisionTarget,
    pub rationale: String,
    pub estimated_cost: f64,
    pub confidence: f64,
    pub decided_at: DateTime<Utc>,
}

/// Inputs to a reflection decision for one outcome
#[derive(Debug, Clone)]
pub struct ReflectionRequest<'a> {
    pub tenant_id: &'a str,
    pub outcome_id: Uuid,
    pub label: EvaluationLabel,
    pub importance: f64,
    /// The outcome already reached a reflection state
    pub already_reflected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionDecision {
    pub mode: ReflectionMode,
    /// Amount debited from the budget for this decision
    pub debited: f64,
    pub decision: PolicyDecision,
}

pub struct PolicyOptimizer {
    config: PolicyConfig,
    audit: Mutex<VecDeque<PolicyDecision>>,
}

impl PolicyOptimizer {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            audit: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn estimated_cost(&self, mode: ReflectionMode) -> f64 {
        match mode {
            ReflectionMode::Full => self.config.cost_full,
            ReflectionMode::Lite => self.config.cost_lite,
            ReflectionMode::Skip => 0.0,
        }
    }

    fn record(&self, decision: PolicyDecision) -> PolicyDecision {
        let mut audit = self.audit.lock().unwrap_or_else(|e| e.into_inner());
        audit.push_back(decision.clone());
        while audit.len() > self.config.audit_log_len {
            audit.pop_front();
        }
        decision
    }

    /// Most recent decisions, oldest first
    pub fn audit_log(&self) -> Vec<PolicyDecision> {
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn choose_retrieval_weights(
        &self,
        tenant_id: &str,
        features: &QueryFeatures,
        budget: &BudgetStatus,
    ) -> (RetrievalWeights, PolicyDecision) {
        let c = &self.config;
        let mut w = RetrievalWeights::new(
            c.vector_weight,
            c.graph_weight,
            c.sparse_weight,
            c.fulltext_weight,
        );
        let mut reasons = Vec::new();

        if features.seeds.is_empty() {
            w.graph = 0.0;
            reasons.push("no graph seeds".to_string());
        } else if let Some(gcs) = features.topic_gcs.or(features.global_gcs) {
            if gcs >= c.graph_gcs_threshold {
                w.graph += c.graph_boost;
                reasons.push(format!("connected topic (gcs {gcs:.2})"));
            }
        }

        if features.has_quoted_phrase {
            w.fulltext += c.phrase_boost;
            reasons.push("quoted phrase".to_string());
        }

        let ratio = budget.remaining_ratio();
        if ratio < c.low_budget_ratio && c.low_budget_ratio > 0.0 {
            let shrink = 1.0 - ratio / c.low_budget_ratio;
            let moved = (w.vector + w.graph) * shrink;
            w.vector *= 1.0 - shrink;
            w.graph *= 1.0 - shrink;
            w.sparse += moved / 2.0;
            w.fulltext += moved / 2.0;
            reasons.push(format!("low budget ({:.0}% left)", ratio * 100.0));
        }

        let weights = w.normalized();
        let rationale = if reasons.is_empty() {
            "base weights".to_string()
        } else {
            reasons.join("; ")
        };
        let decision = self.record(PolicyDecision {
            tenant_id: tenant_id.to_string(),
            target: DecisionTarget::RetrievalWeights(weights),
            rationale,
            estimated_cost: 0.0,
            confidence: if features.topic_gcs.is_some() { 0.8 } else { 0.6 },
            decided_at: Utc::now(),
        });
        (weights, decision)
    }

    /// Pick full, lite or skip for one outcome. A chosen mode's estimated
    /// cost is debited immediately; when the budget cannot cover it the
    /// mode is downgraded full -> lite -> skip.
    pub fn decide_reflection(
        &self,
        request: &ReflectionRequest<'_>,
        budget: &BudgetLedger,
        history: &ReflectionHistory,
    ) -> ReflectionDecision {
        let c = &self.config;
        let confidence = 0.5 + 0.5 * (history.gain_samples.min(10) as f64 / 10.0);

        let (candidate, mut rationale) = if request.already_reflected {
            (ReflectionMode::Skip, "outcome already reflected".to_string())
        } else {
            match request.label {
                EvaluationLabel::Success if request.importance < c.success_skip_importance => {
                    match history.success_rate {
                        Some(rate) if rate < c.min_success_rate => (
                            ReflectionMode::Lite,
                            format!("low-importance success but pattern success rate {rate:.2}"),
                        ),
                        _ => (ReflectionMode::Skip, "low-importance success".to_string()),
                    }
                }
                EvaluationLabel::Success => {
                    (ReflectionMode::Lite, "important success".to_string())
                }
                EvaluationLabel::Failure => {
                    let positive = history
                        .mean_gain
                        .map(|g| g > 0.0)
                        .unwrap_or(c.assume_positive_gain_without_history);
                    if positive {
                        (ReflectionMode::Full, "failure with positive reflection gain".to_string())
                    } else {
                        (ReflectionMode::Lite, "failure but reflection gain not positive".to_string())
                    }
                }
                EvaluationLabel::Neutral if request.importance < c.success_skip_importance => {
                    (ReflectionMode::Skip, "low-importance neutral outcome".to_string())
                }
                EvaluationLabel::Neutral => {
                    (ReflectionMode::Lite, "important neutral outcome".to_string())
                }
            }
        };

        let mut mode = candidate;
        let mut debited = 0.0;
        while mode != ReflectionMode::Skip {
            let cost = self.estimated_cost(mode);
            if cost <= 0.0 {
                break;
            }
            match budget.debit(request.tenant_id, cost) {
                Ok(()) => {
                    debited = cost;
                    break;
                }
                Err(_) => {
                    let downgraded = match mode {
                        ReflectionMode::Full => ReflectionMode::Lite,
                        _ => ReflectionMode::Skip,
                    };
                    tracing::warn!(
                        tenant_id = request.tenant_id,
                        outcome_id = %request.outcome_id,
                        from = ?mode,
                        to = ?downgraded,
                        "Insufficient budget, downgrading reflection"
                    );
                    rationale.push_str(&format!("; budget too low for {mode:?}"));
                    mode = downgraded;
                }
            }
        }

        let decision = self.record(PolicyDecision {
            tenant_id: request.tenant_id.to_string(),
            target: DecisionTarget::ReflectionMode(mode),
            rationale,
            estimated_cost: debited,
            confidence,
            decided_at: Utc::now(),
        });
        ReflectionDecision {
            mode,
            debited,
            decision,
        }
    }

    /// Whether a pruning pass should run now
    pub fn decide_prune_trigger(
        &self,
        tenant_id: &str,
        structure: Option<&StructureSnapshot>,
        dynamics: Option<&DynamicsSnapshot>,
    ) -> (bool, PolicyDecision) {
        let c = &self.config;
        let mut reasons = Vec::new();

        if let Some(s) = structure.filter(|s| !s.insufficient_data) {
            if s.gcs < c.prune_gcs_threshold {
                reasons.push(format!("fragmented graph (gcs {:.2})", s.gcs));
            }
        }
        if let Some(d) = dynamics {
            if let Some(&drift) = d.structural_drift.value() {
                if drift > c.prune_drift_threshold {
                    reasons.push(format!("structural drift {drift:.2}"));
                }
            }
            if let Some(mdi) = d.mdi.value() {
                if mdi.mean > c.prune_mdi_threshold {
                    reasons.push(format!("memory drift {:.2}", mdi.mean));
                }
            }
        }

        let trigger = !reasons.is_empty();
        let rationale = if trigger {
            reasons.join("; ")
        } else {
            "metrics within thresholds".to_string()
        };
        let decision = self.record(PolicyDecision {
            tenant_id: tenant_id.to_string(),
            target: DecisionTarget::PruneTrigger(trigger),
            rationale,
            estimated_cost: 0.0,
            confidence: if structure.is_some() && dynamics.is_some() { 0.8 } else { 0.5 },
            decided_at: Utc::now(),
        });
        (trigger, decision)
    }
}
