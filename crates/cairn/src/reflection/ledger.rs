//! Reflection ledger: outcomes and their reflection records, keyed by
//! outcome id. State changes are checked against the allowed transitions
//! while the entry is locked, so each record moves forward exactly once.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::{CairnError, Result};

use super::types::{Outcome, ReflectionRecord, ReflectionState};

#[derive(Debug, Default)]
pub struct ReflectionLedger {
    outcomes: DashMap<Uuid, Outcome>,
    records: DashMap<Uuid, ReflectionRecord>,
}

impl ReflectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an outcome id before any side effect is written for it.
    /// Returns false if the id is already claimed or open. A claimed
    /// outcome is not pending until [`open`](Self::open) is called.
    pub fn claim(&self, outcome: &Outcome) -> bool {
        match self.outcomes.entry(outcome.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(outcome.clone());
                true
            }
        }
    }

    /// Drop a claim that never reached [`open`](Self::open)
    pub fn release(&self, outcome_id: Uuid) {
        if !self.records.contains_key(&outcome_id) {
            self.outcomes.remove(&outcome_id);
        }
    }

    /// Register an outcome with a pending record. Returns false if the
    /// outcome id already has a record.
    pub fn open(&self, outcome: Outcome) -> bool {
        match self.records.entry(outcome.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let record = ReflectionRecord::pending(&outcome);
                self.outcomes.insert(outcome.id, outcome);
                slot.insert(record);
                true
            }
        }
    }

    pub fn outcome(&self, outcome_id: Uuid, tenant_id: &str) -> Option<Outcome> {
        self.outcomes
            .get(&outcome_id)
            .filter(|o| o.tenant_id == tenant_id)
            .map(|o| o.clone())
    }

    pub fn record(&self, outcome_id: Uuid, tenant_id: &str) -> Option<ReflectionRecord> {
        self.records
            .get(&outcome_id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.clone())
    }

    /// Move a record to `next`, applying `update` under the same lock
    pub fn transition<F>(
        &self,
        outcome_id: Uuid,
        tenant_id: &str,
        next: ReflectionState,
        update: F,
    ) -> Result<ReflectionRecord>
    where
        F: FnOnce(&mut ReflectionRecord),
    {
        let mut record = self
            .records
            .get_mut(&outcome_id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| CairnError::NotFound(format!("reflection for outcome {outcome_id}")))?;

        if !record.state.can_transition_to(next) {
            return Err(CairnError::Validation(format!(
                "reflection for outcome {outcome_id} cannot move from {} to {next}",
                record.state
            )));
        }
        update(&mut *record);
        record.state = next;
        record.updated_at = Utc::now();
        tracing::debug!(tenant_id, outcome_id = %outcome_id, state = %next, "Reflection state changed");
        Ok(record.clone())
    }

    /// Outcome ids still awaiting evaluation, oldest first
    pub fn pending(&self, tenant_id: &str) -> Vec<Uuid> {
        let mut pending: Vec<(DateTime<Utc>, Uuid)> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.state == ReflectionState::PendingEvaluation)
            .map(|r| (r.created_at, r.outcome_id))
            .collect();
        pending.sort();
        pending.into_iter().map(|(_, id)| id).collect()
    }

    /// Forget terminal records last changed before `cutoff`, along with
    /// their outcomes. Returns how many were evicted.
    pub fn evict_terminal(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.records.retain(|id, r| {
            let stale = r.tenant_id == tenant_id && r.state.is_terminal() && r.updated_at < cutoff;
            if stale {
                self.outcomes.remove(id);
                evicted += 1;
            }
            !stale
        });
        if evicted > 0 {
            tracing::debug!(tenant_id, evicted, "Evicted settled reflection records");
        }
        evicted
    }

    pub fn records(&self, tenant_id: &str) -> Vec<ReflectionRecord> {
        let mut records: Vec<ReflectionRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_idempotent() {
        let ledger = ReflectionLedger::new();
        let outcome = Outcome::new("t1", "deploy", "push", "ok");
        assert!(ledger.open(outcome.clone()));
        assert!(!ledger.open(outcome.clone()));
        assert_eq!(ledger.pending("t1"), vec![outcome.id]);
    }

    #[test]
    fn test_records_are_tenant_scoped() {
        let ledger = ReflectionLedger::new();
        let outcome = Outcome::new("t1", "deploy", "push", "ok");
        ledger.open(outcome.clone());
        assert!(ledger.record(outcome.id, "t2").is_none());
        assert!(ledger.outcome(outcome.id, "t2").is_none());
        assert!(ledger.pending("t2").is_empty());
        let err = ledger
            .transition(outcome.id, "t2", ReflectionState::Evaluated, |_| {})
            .unwrap_err();
        assert!(matches!(err, CairnError::NotFound(_)));
    }

    #[test]
    fn test_transition_happens_once() {
        let ledger = ReflectionLedger::new();
        let outcome = Outcome::new("t1", "deploy", "push", "ok");
        ledger.open(outcome.clone());

        ledger
            .transition(outcome.id, "t1", ReflectionState::Evaluated, |_| {})
            .unwrap();
        let again = ledger.transition(outcome.id, "t1", ReflectionState::Evaluated, |_| {});
        assert!(matches!(again, Err(CairnError::Validation(_))));

        let skipped = ledger
            .transition(outcome.id, "t1", ReflectionState::ReflectionSkipped, |_| {})
            .unwrap();
        assert!(skipped.state.is_terminal());
        assert!(ledger.pending("t1").is_empty());
    }

    #[test]
    fn test_claim_reserves_without_pending() {
        let ledger = ReflectionLedger::new();
        let outcome = Outcome::new("t1", "deploy", "push", "ok");
        assert!(ledger.claim(&outcome));
        assert!(!ledger.claim(&outcome));
        assert!(ledger.pending("t1").is_empty());

        ledger.release(outcome.id);
        assert!(ledger.claim(&outcome));
        assert!(ledger.open(outcome.clone()));
        // An opened outcome keeps its claim
        ledger.release(outcome.id);
        assert!(!ledger.claim(&outcome));
        assert_eq!(ledger.pending("t1"), vec![outcome.id]);
    }

    #[test]
    fn test_evict_terminal_keeps_live_and_recent() {
        let ledger = ReflectionLedger::new();
        let settled = Outcome::new("t1", "deploy", "push", "ok");
        let waiting = Outcome::new("t1", "deploy", "push again", "ok");
        let other = Outcome::new("t2", "deploy", "push", "ok");
        for outcome in [&settled, &waiting, &other] {
            ledger.open(outcome.clone());
        }
        for outcome in [&settled, &other] {
            ledger
                .transition(outcome.id, &outcome.tenant_id, ReflectionState::Evaluated, |_| {})
                .unwrap();
            ledger
                .transition(outcome.id, &outcome.tenant_id, ReflectionState::ReflectionSkipped, |_| {})
                .unwrap();
        }

        let long_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(ledger.evict_terminal("t1", long_ago), 0);

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(ledger.evict_terminal("t1", later), 1);
        assert!(ledger.record(settled.id, "t1").is_none());
        assert!(ledger.outcome(settled.id, "t1").is_none());
        assert_eq!(ledger.pending("t1"), vec![waiting.id]);
        assert!(ledger.record(other.id, "t2").is_some());
    }
}
