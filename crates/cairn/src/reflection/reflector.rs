//! Reflector: drives one outcome from evaluation to a terminal state

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CairnError, Result};
use crate::math::{BudgetLedger, DynamicsTracker, PolicyOptimizer, ReflectionMode, ReflectionRequest};
use crate::memory::{Layer, MemoryDraft, MemoryId, MemoryStore, MemoryType};

use super::evaluator::Evaluator;
use super::insight::{Insight, InsightGenerator, InsightRequest};
use super::ledger::ReflectionLedger;
use super::types::{EvaluationLabel, Outcome, ReflectionRecord, ReflectionState};

pub const REFLECTION_TAG: &str = "reflection";
pub const DEGRADED_KEY: &str = "degraded_reflection";

pub struct Reflector {
    store: Arc<MemoryStore>,
    ledger: Arc<ReflectionLedger>,
    policy: Arc<PolicyOptimizer>,
    budget: Arc<BudgetLedger>,
    dynamics: Arc<DynamicsTracker>,
    evaluator: Arc<dyn Evaluator>,
    /// Model-backed generator used for full reflections
    full: Arc<dyn InsightGenerator>,
    /// Heuristic generator used for lite reflections and degraded full ones
    lite: Arc<dyn InsightGenerator>,
}

impl Reflector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        ledger: Arc<ReflectionLedger>,
        policy: Arc<PolicyOptimizer>,
        budget: Arc<BudgetLedger>,
        dynamics: Arc<DynamicsTracker>,
        evaluator: Arc<dyn Evaluator>,
        full: Arc<dyn InsightGenerator>,
        lite: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            budget,
            dynamics,
            evaluator,
            full,
            lite,
        }
    }

    pub fn ledger(&self) -> &Arc<ReflectionLedger> {
        &self.ledger
    }

    /// Evaluate and, if policy says so, reflect on one outcome. Outcomes
    /// that already left `PENDING_EVALUATION` are returned unchanged.
    pub async fn reflect(&self, outcome_id: Uuid, tenant_id: &str) -> Result<ReflectionRecord> {
        let record = self
            .ledger
            .record(outcome_id, tenant_id)
            .ok_or_else(|| CairnError::NotFound(format!("outcome {outcome_id}")))?;
        if record.state != ReflectionState::PendingEvaluation {
            tracing::debug!(tenant_id, outcome_id = %outcome_id, state = %record.state, "Outcome already processed");
            return Ok(record);
        }
        let outcome = self
            .ledger
            .outcome(outcome_id, tenant_id)
            .ok_or_else(|| CairnError::NotFound(format!("outcome {outcome_id}")))?;

        let label = self.evaluator.evaluate(&outcome);
        // Losing this race means another caller owns the outcome
        if let Err(e) = self.ledger.transition(outcome_id, tenant_id, ReflectionState::Evaluated, |r| {
            r.evaluation_label = Some(label);
        }) {
            tracing::debug!(tenant_id, outcome_id = %outcome_id, error = %e, "Outcome claimed elsewhere");
            return self
                .ledger
                .record(outcome_id, tenant_id)
                .ok_or_else(|| CairnError::NotFound(format!("outcome {outcome_id}")));
        }

        if label != EvaluationLabel::Neutral {
            self.dynamics
                .record_outcome(tenant_id, &outcome.pattern, label == EvaluationLabel::Success);
        }
        let history = self.dynamics.pattern_history(tenant_id, &outcome.pattern);
        let decision = self.policy.decide_reflection(
            &ReflectionRequest {
                tenant_id,
                outcome_id,
                label,
                importance: outcome.importance,
                already_reflected: false,
            },
            &self.budget,
            &history,
        );

        if decision.mode == ReflectionMode::Skip {
            return self.ledger.transition(
                outcome_id,
                tenant_id,
                ReflectionState::ReflectionSkipped,
                |r| r.mode = Some(ReflectionMode::Skip),
            );
        }
        self.ledger.transition(
            outcome_id,
            tenant_id,
            ReflectionState::ReflectionTriggered,
            |r| r.mode = Some(decision.mode),
        )?;

        let request = InsightRequest {
            outcome: outcome.clone(),
            label,
        };
        let (insight, degraded) = match self.synthesize(&request, decision.mode, decision.debited).await {
            Ok(generated) => generated,
            Err(e) => return self.fail(outcome_id, tenant_id, e),
        };

        match self.persist(&outcome, label, decision.mode, &insight, degraded).await {
            Ok(memory_ids) => {
                tracing::info!(
                    tenant_id,
                    outcome_id = %outcome_id,
                    mode = ?decision.mode,
                    degraded,
                    "Reflection stored"
                );
                self.ledger.transition(outcome_id, tenant_id, ReflectionState::Reflected, |r| {
                    r.reflection_text = Some(insight.reflection_text.clone());
                    r.strategy_text = insight.strategy_text.clone();
                    r.memory_ids = memory_ids;
                    r.degraded = degraded;
                })
            }
            Err(e) => self.fail(outcome_id, tenant_id, e),
        }
    }

    /// Evaluate every pending outcome of the tenant
    pub async fn reflect_pending(&self, tenant_id: &str) -> Result<Vec<ReflectionRecord>> {
        let mut done = Vec::new();
        for outcome_id in self.ledger.pending(tenant_id) {
            match self.reflect(outcome_id, tenant_id).await {
                Ok(record) => done.push(record),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(tenant_id, outcome_id = %outcome_id, error = %e, "Reflection failed")
                }
            }
        }
        Ok(done)
    }

    /// Produce the insight for the chosen mode. A failed model call during
    /// a full reflection refunds its debit and falls back to templates. An
    /// empty reply is charged what it cost, then falls back the same way.
    async fn synthesize(
        &self,
        request: &InsightRequest,
        mode: ReflectionMode,
        debited: f64,
    ) -> Result<(Insight, bool)> {
        let tenant_id = request.outcome.tenant_id.as_str();
        if mode != ReflectionMode::Full {
            return Ok((self.lite.generate(request).await?, false));
        }

        match self.full.generate(request).await {
            Ok(insight) => {
                self.budget.reconcile(tenant_id, debited, insight.cost)?;
                if !insight.reflection_text.trim().is_empty() {
                    return Ok((insight, false));
                }
                tracing::warn!(
                    tenant_id,
                    outcome_id = %request.outcome.id,
                    model = insight.model_used.as_deref().unwrap_or("unknown"),
                    cost = insight.cost,
                    "Model returned an empty reflection, downgrading to lite reflection"
                );
                Ok((self.lite.generate(request).await?, true))
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id,
                    outcome_id = %request.outcome.id,
                    error = %e,
                    "Model gateway unavailable, downgrading to lite reflection"
                );
                self.budget.credit(tenant_id, debited)?;
                Ok((self.lite.generate(request).await?, true))
            }
        }
    }

    async fn persist(
        &self,
        outcome: &Outcome,
        label: EvaluationLabel,
        mode: ReflectionMode,
        insight: &Insight,
        degraded: bool,
    ) -> Result<Vec<MemoryId>> {
        let base = |memory_type: MemoryType, content: &str| {
            let mut draft = MemoryDraft::new(
                outcome.tenant_id.clone(),
                Layer::Reflective.as_str(),
                memory_type.as_str(),
                content,
            )
            .with_importance(outcome.importance)
            .with_tag(outcome.pattern.clone())
            .with_tag(label.as_str())
            .with_metadata("outcome_id", serde_json::json!(outcome.id))
            .with_metadata("evaluation_label", serde_json::json!(label))
            .with_metadata("reflection_mode", serde_json::json!(mode))
            .with_metadata(DEGRADED_KEY, serde_json::json!(degraded));
            if let Some(ref model) = insight.model_used {
                draft = draft.with_metadata("model_used", serde_json::json!(model));
            }
            if let Some(ref session) = outcome.session_id {
                draft = draft.with_session(session.clone());
            }
            draft.source_ids = outcome.memory_id.into_iter().collect();
            draft
        };

        let reflection = base(MemoryType::Reflection, &insight.reflection_text).with_tag(REFLECTION_TAG);
        let reflection_id = self.store.store(reflection).await?;

        let Some(ref strategy) = insight.strategy_text else {
            return Ok(vec![reflection_id]);
        };
        let strategy = base(MemoryType::Strategy, strategy).with_tag("strategy");
        match self.store.store(strategy).await {
            Ok(strategy_id) => Ok(vec![reflection_id, strategy_id]),
            Err(e) => {
                // A failed reflection leaves no half-written memories behind
                if let Err(cleanup) = self.store.delete(reflection_id, &outcome.tenant_id).await {
                    tracing::error!(
                        tenant_id = %outcome.tenant_id,
                        memory_id = %reflection_id,
                        error = %cleanup,
                        "Failed to remove orphaned reflection memory"
                    );
                }
                Err(e)
            }
        }
    }

    fn fail(&self, outcome_id: Uuid, tenant_id: &str, error: CairnError) -> Result<ReflectionRecord> {
        if error.is_fatal() {
            return Err(error);
        }
        tracing::warn!(tenant_id, outcome_id = %outcome_id, error = %error, "Reflection failed");
        self.ledger.transition(outcome_id, tenant_id, ReflectionState::ReflectionFailed, |r| {
            r.failure_reason = Some(error.to_string());
        })
    }
}
