use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CairnError, Result};
use crate::memory::store::require_tenant;
use crate::memory::{Layer, MemoryDraft, MemoryStore, MemoryType};

use super::ledger::ReflectionLedger;
use super::types::Outcome;

pub const OUTCOME_TAG: &str = "outcome";

/// Captures raw outcomes. No judgement happens here: the outcome is stored
/// as an episodic memory and opened in the ledger for evaluation.
pub struct Actor {
    store: Arc<MemoryStore>,
    ledger: Arc<ReflectionLedger>,
}

impl Actor {
    pub fn new(store: Arc<MemoryStore>, ledger: Arc<ReflectionLedger>) -> Self {
        Self { store, ledger }
    }

    pub async fn record_outcome(&self, mut outcome: Outcome) -> Result<Uuid> {
        require_tenant(&outcome.tenant_id)?;
        if !outcome.importance.is_finite() || !(0.0..=1.0).contains(&outcome.importance) {
            return Err(CairnError::Validation(format!(
                "outcome importance must be within [0, 1], got {}",
                outcome.importance
            )));
        }
        if let Some(score) = outcome.score {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(CairnError::Validation(format!(
                    "outcome score must be within [0, 1], got {score}"
                )));
            }
        }
        if outcome.action.trim().is_empty() {
            return Err(CairnError::Validation("outcome action must not be empty".to_string()));
        }
        if !self.ledger.claim(&outcome) {
            tracing::debug!(tenant_id = %outcome.tenant_id, outcome_id = %outcome.id, "Outcome already recorded");
            return Ok(outcome.id);
        }

        let content = format!("{}: {}", outcome.action, outcome.result);
        let mut draft = MemoryDraft::new(
            outcome.tenant_id.clone(),
            Layer::Working.as_str(),
            MemoryType::Episodic.as_str(),
            content,
        )
        .with_importance(outcome.importance)
        .with_tag(OUTCOME_TAG)
        .with_tag(outcome.pattern.clone())
        .with_metadata("outcome_id", serde_json::json!(outcome.id))
        .with_metadata("pattern", serde_json::json!(outcome.pattern));
        if let Some(success) = outcome.success {
            draft = draft.with_metadata("success", serde_json::json!(success));
        }
        if let Some(ref session) = outcome.session_id {
            draft = draft.with_session(session.clone());
        }

        let memory_id = match self.store.store(draft).await {
            Ok(id) => id,
            Err(e) => {
                self.ledger.release(outcome.id);
                return Err(e);
            }
        };
        outcome.memory_id = Some(memory_id);

        let id = outcome.id;
        let tenant_id = outcome.tenant_id.clone();
        self.ledger.open(outcome);
        tracing::debug!(tenant_id = %tenant_id, outcome_id = %id, memory_id = %memory_id, "Recorded outcome");
        Ok(id)
    }
}
