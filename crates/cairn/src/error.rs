//! Error types for Cairn

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Cairn operations
#[derive(Error, Debug)]
pub enum CairnError {
    /// Bad input from the caller; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// A tenant-scoped operation was called without a tenant
    #[error("Tenant id is required")]
    TenantRequired,

    /// Data belonging to another tenant crossed a tenant boundary
    #[error("Tenant isolation violation: expected tenant {expected}, found {found}")]
    TenantIsolationViolation { expected: String, found: String },

    /// Storage, vector index or graph store failed after retrying
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Requested record does not exist for this tenant
    #[error("Not found: {0}")]
    NotFound(String),

    /// The model gateway has no usable provider
    #[error("No model provider available: {0}")]
    NoProviderAvailable(String),

    /// Not enough budget left for the requested operation
    #[error("Budget exceeded for tenant {tenant_id}: requested {requested:.4}, remaining {remaining:.4}")]
    BudgetExceeded {
        tenant_id: String,
        requested: f64,
        remaining: f64,
    },

    /// Drift crossed its configured limit
    #[error("Drift anomaly detected for tenant {tenant_id}: {detail}")]
    DriftAnomalyDetected { tenant_id: String, detail: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CairnError {
    pub fn memory_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("memory {id}"))
    }

    /// Conditions that callers absorb through a degradation path.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::NoProviderAvailable(_) | Self::BudgetExceeded { .. }
        )
    }

    /// Conditions that must abort the operation and alert.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TenantIsolationViolation { .. })
    }
}

impl From<serde_json::Error> for CairnError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for Cairn operations
pub type Result<T> = std::result::Result<T, CairnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CairnError::StorageUnavailable("down".into()).is_transient());
        assert!(CairnError::NoProviderAvailable("none".into()).is_transient());
        assert!(!CairnError::Validation("bad".into()).is_transient());
        assert!(!CairnError::TenantRequired.is_transient());
    }

    #[test]
    fn test_isolation_is_fatal() {
        let err = CairnError::TenantIsolationViolation {
            expected: "a".into(),
            found: "b".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("expected tenant a"));
    }
}
