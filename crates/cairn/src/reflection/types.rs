use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math::ReflectionMode;
use crate::memory::MemoryId;

/// Verdict the evaluator gives an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationLabel {
    Success,
    Failure,
    Neutral,
}

impl EvaluationLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationLabel::Success => "success",
            EvaluationLabel::Failure => "failure",
            EvaluationLabel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for EvaluationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw action outcome as captured by the actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: Uuid,
    pub tenant_id: String,
    /// Action family used to group reflection history, e.g. "deploy"
    pub pattern: String,
    pub action: String,
    pub result: String,
    /// Explicit success/failure signal, if the caller has one
    pub success: Option<bool>,
    /// Externally measured score in [0, 1]
    pub score: Option<f64>,
    pub importance: f64,
    pub session_id: Option<String>,
    /// Episodic memory the actor stored for this outcome
    pub memory_id: Option<MemoryId>,
    pub recorded_at: DateTime<Utc>,
}

impl Outcome {
    pub fn new(
        tenant_id: impl Into<String>,
        pattern: impl Into<String>,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            pattern: pattern.into(),
            action: action.into(),
            result: result.into(),
            success: None,
            score: None,
            importance: 0.5,
            session_id: None,
            memory_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn succeeded(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Lifecycle of one outcome through the reflection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReflectionState {
    PendingEvaluation,
    Evaluated,
    ReflectionSkipped,
    ReflectionTriggered,
    Reflected,
    ReflectionFailed,
}

impl ReflectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReflectionState::ReflectionSkipped
                | ReflectionState::Reflected
                | ReflectionState::ReflectionFailed
        )
    }

    pub fn can_transition_to(&self, next: ReflectionState) -> bool {
        use ReflectionState::*;
        matches!(
            (self, next),
            (PendingEvaluation, Evaluated)
                | (Evaluated, ReflectionSkipped)
                | (Evaluated, ReflectionTriggered)
                | (ReflectionTriggered, Reflected)
                | (ReflectionTriggered, ReflectionFailed)
        )
    }
}

impl fmt::Display for ReflectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReflectionState::PendingEvaluation => "PENDING_EVALUATION",
            ReflectionState::Evaluated => "EVALUATED",
            ReflectionState::ReflectionSkipped => "REFLECTION_SKIPPED",
            ReflectionState::ReflectionTriggered => "REFLECTION_TRIGGERED",
            ReflectionState::Reflected => "REFLECTED",
            ReflectionState::ReflectionFailed => "REFLECTION_FAILED",
        };
        f.write_str(s)
    }
}

/// One record per outcome considered for reflection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionRecord {
    pub id: Uuid,
    pub outcome_id: Uuid,
    pub tenant_id: String,
    pub evaluation_label: Option<EvaluationLabel>,
    pub mode: Option<ReflectionMode>,
    pub reflection_text: Option<String>,
    pub strategy_text: Option<String>,
    pub state: ReflectionState,
    /// Memories written for this reflection
    pub memory_ids: Vec<MemoryId>,
    /// Model-backed reflection fell back to templates
    pub degraded: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReflectionRecord {
    pub fn pending(outcome: &Outcome) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            outcome_id: outcome.id,
            tenant_id: outcome.tenant_id.clone(),
            evaluation_label: None,
            mode: None,
            reflection_text: None,
            strategy_text: None,
            state: ReflectionState::PendingEvaluation,
            memory_ids: Vec::new(),
            degraded: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReflectionState::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(PendingEvaluation.can_transition_to(Evaluated));
        assert!(Evaluated.can_transition_to(ReflectionSkipped));
        assert!(Evaluated.can_transition_to(ReflectionTriggered));
        assert!(ReflectionTriggered.can_transition_to(Reflected));
        assert!(ReflectionTriggered.can_transition_to(ReflectionFailed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [ReflectionSkipped, Reflected, ReflectionFailed] {
            assert!(terminal.is_terminal());
            for next in [
                PendingEvaluation,
                Evaluated,
                ReflectionSkipped,
                ReflectionTriggered,
                Reflected,
                ReflectionFailed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!PendingEvaluation.can_transition_to(Reflected));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ReflectionTriggered).unwrap();
        assert_eq!(json, "\"REFLECTION_TRIGGERED\"");
        assert_eq!(ReflectionSkipped.to_string(), "REFLECTION_SKIPPED");
    }
}
