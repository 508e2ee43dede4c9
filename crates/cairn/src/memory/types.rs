//! Memory types for the Cairn system
//!
//! Defines the stored `Memory` record, the untrusted `MemoryDraft` callers
//! submit, and the layer and type enums that classify both.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CairnError;

pub type MemoryId = Uuid;

/// Memory tier. Determines default decay rate and retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Raw, short-lived input
    Sensory,
    /// Active session context
    Working,
    /// Consolidated knowledge
    LongTerm,
    /// Insights derived from outcomes
    Reflective,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::Sensory,
        Layer::Working,
        Layer::LongTerm,
        Layer::Reflective,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Sensory => "sensory",
            Layer::Working => "working",
            Layer::LongTerm => "long_term",
            Layer::Reflective => "reflective",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sensory" => Ok(Layer::Sensory),
            "working" => Ok(Layer::Working),
            "long_term" | "longterm" => Ok(Layer::LongTerm),
            "reflective" => Ok(Layer::Reflective),
            other => Err(CairnError::Validation(format!("unknown layer '{other}'"))),
        }
    }
}

/// What kind of experience a memory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Sensory,
    /// What happened
    Episodic,
    /// Facts and knowledge
    Semantic,
    /// About the user or agent
    Profile,
    /// Derived insight about an outcome
    Reflection,
    /// How to act next time
    Strategy,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Sensory => "sensory",
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Profile => "profile",
            MemoryType::Reflection => "reflection",
            MemoryType::Strategy => "strategy",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sensory" => Ok(MemoryType::Sensory),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "profile" => Ok(MemoryType::Profile),
            "reflection" => Ok(MemoryType::Reflection),
            "strategy" => Ok(MemoryType::Strategy),
            other => Err(CairnError::Validation(format!(
                "unknown memory type '{other}'"
            ))),
        }
    }
}

/// A single stored unit of agent experience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    /// Access-control boundary; never changes after creation
    pub tenant_id: String,
    pub project_id: String,
    pub layer: Layer,
    pub memory_type: MemoryType,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    /// Always within [0, 1]
    pub importance: f64,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub session_id: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Memories this one was consolidated from
    pub source_ids: Vec<MemoryId>,
    /// Bumped on every stored mutation, used for compare-and-swap
    pub version: u64,
    /// Reference time of the last decay application
    pub decayed_at: DateTime<Utc>,
}

impl Memory {
    /// Create a memory with default lifecycle values
    pub fn new(
        tenant_id: impl Into<String>,
        layer: Layer,
        memory_type: MemoryType,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            project_id: String::new(),
            layer,
            memory_type,
            content: content.into(),
            embedding: None,
            importance: 0.5,
            usage_count: 0,
            created_at: now,
            last_accessed_at: now,
            expires_at: None,
            tags: BTreeSet::new(),
            session_id: None,
            metadata: BTreeMap::new(),
            source_ids: Vec::new(),
            version: 0,
            decayed_at: now,
        }
    }

    /// Update the importance, clamped to [0, 1]
    pub fn set_importance(&mut self, importance: f64) {
        self.importance = if importance.is_nan() {
            0.0
        } else {
            importance.clamp(0.0, 1.0)
        };
    }

    /// Record an access and apply a bounded importance boost
    pub fn mark_accessed(&mut self, boost: f64, now: DateTime<Utc>) {
        self.usage_count += 1;
        self.last_accessed_at = now;
        self.set_importance(self.importance + boost);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Caller-supplied memory before validation. Layer and type arrive as
/// strings so unrecognised values can be rejected with a typed error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub project_id: String,
    pub layer: String,
    pub memory_type: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub source_ids: Vec<MemoryId>,
}

impl MemoryDraft {
    pub fn new(
        tenant_id: impl Into<String>,
        layer: impl Into<String>,
        memory_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            layer: layer.into(),
            memory_type: memory_type.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
