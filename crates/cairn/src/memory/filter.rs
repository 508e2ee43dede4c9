//! Filter types for memory queries
//!
//! Filters narrow a tenant-scoped query by layer, type, tags, time range,
//! session and importance. The tenant itself is never part of the filter;
//! every storage call takes it as a separate argument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::types::{Layer, Memory, MemoryType};

/// Filter criteria for memory queries.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Match any of these layers
    pub layers: Option<Vec<Layer>>,
    /// Match any of these memory types
    pub memory_types: Option<Vec<MemoryType>>,
    /// Every tag listed must be present
    pub tags: Option<Vec<String>>,
    /// Only memories created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Only memories created before this time
    pub until: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    /// Minimum importance (inclusive)
    pub min_importance: Option<f64>,
}

impl MemoryFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_memory_types(mut self, types: Vec<MemoryType>) -> Self {
        self.memory_types = Some(types);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = Some(min_importance);
        self
    }

    /// Check a memory against every condition in this filter
    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref layers) = self.layers {
            if !layers.is_empty() && !layers.contains(&memory.layer) {
                return false;
            }
        }

        if let Some(ref types) = self.memory_types {
            if !types.is_empty() && !types.contains(&memory.memory_type) {
                return false;
            }
        }

        if let Some(ref tags) = self.tags {
            if !tags.iter().all(|t| memory.tags.contains(t)) {
                return false;
            }
        }

        if self.since.is_some_and(|since| memory.created_at < since) {
            return false;
        }

        if self.until.is_some_and(|until| memory.created_at >= until) {
            return false;
        }

        if let Some(ref session_id) = self.session_id {
            if memory.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }

        if let Some(ref project_id) = self.project_id {
            if &memory.project_id != project_id {
                return false;
            }
        }

        if self.min_importance.is_some_and(|min| memory.importance < min) {
            return false;
        }

        true
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.layers.is_none()
            && self.memory_types.is_none()
            && self.tags.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.session_id.is_none()
            && self.project_id.is_none()
            && self.min_importance.is_none()
    }
}
