//! The three-tier decision layer: structure (Math-1), dynamics (Math-2)
//! and policy (Math-3), plus the budget ledger policy decisions draw on.

pub mod budget;
pub mod dynamics;
pub mod policy;
pub mod structure;

pub use budget::{BudgetLedger, BudgetStatus};
pub use dynamics::{
    DynamicsAlert, DynamicsSnapshot, DynamicsTracker, Metric, ReflectionHistory,
};
pub use policy::{
    DecisionTarget, PolicyDecision, PolicyOptimizer, QueryFeatures, ReflectionDecision,
    ReflectionMode, ReflectionRequest, RetrievalWeights,
};
pub use structure::{StructureAnalyzer, StructureSnapshot};
