use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{CairnError, Result};
use crate::memory::Layer;

/// Main configuration structure for Cairn
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage backend behaviour (retries, CAS, embedding size)
    #[serde(default)]
    pub storage: StorageConfig,
    /// Decay, access boost, TTL, pruning and consolidation
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Structure analyzer settings
    #[serde(default)]
    pub structure: StructureConfig,
    /// Dynamics tracker settings
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    /// Policy optimizer thresholds and weights
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Per-tenant budget ledger
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Hybrid search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Actor-Evaluator-Reflector settings
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// Model gateway strategy and cache
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Background worker schedules
    #[serde(default)]
    pub workers: WorkersConfig,
}

impl Config {
    /// Read and parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CairnError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CairnError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or the first default location that exists.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(&path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".cairn").join("config.toml")),
            dirs::config_dir().map(|c| c.join("cairn").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let lc = &self.lifecycle;
        for (name, rate) in [
            ("lifecycle.sensory_decay_rate", lc.sensory_decay_rate),
            ("lifecycle.working_decay_rate", lc.working_decay_rate),
            ("lifecycle.long_term_decay_rate", lc.long_term_decay_rate),
            ("lifecycle.reflective_decay_rate", lc.reflective_decay_rate),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(CairnError::Config(format!("{name} must be >= 0, got {rate}")));
            }
        }

        for (name, ratio) in [
            ("lifecycle.default_importance", lc.default_importance),
            ("lifecycle.prune_threshold", lc.prune_threshold),
            ("lifecycle.reflective_prune_floor", lc.reflective_prune_floor),
            ("lifecycle.consolidation_bonus", lc.consolidation_bonus),
            ("lifecycle.sensory_access_boost", lc.sensory_access_boost),
            ("lifecycle.working_access_boost", lc.working_access_boost),
            ("lifecycle.long_term_access_boost", lc.long_term_access_boost),
            ("lifecycle.reflective_access_boost", lc.reflective_access_boost),
            ("structure.fragmentation_threshold", self.structure.fragmentation_threshold),
            ("dynamics.mdi_percentile", self.dynamics.mdi_percentile),
            ("policy.graph_gcs_threshold", self.policy.graph_gcs_threshold),
            ("policy.low_budget_ratio", self.policy.low_budget_ratio),
            ("policy.success_skip_importance", self.policy.success_skip_importance),
            ("policy.min_success_rate", self.policy.min_success_rate),
            ("policy.prune_gcs_threshold", self.policy.prune_gcs_threshold),
            ("budget.warning_ratio", self.budget.warning_ratio),
            ("reflection.success_threshold", self.reflection.success_threshold),
            ("reflection.failure_threshold", self.reflection.failure_threshold),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CairnError::Config(format!(
                    "{name} must be within [0, 1], got {ratio}"
                )));
            }
        }

        let w = &self.policy;
        let weights = [w.vector_weight, w.graph_weight, w.sparse_weight, w.fulltext_weight];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) || weights.iter().sum::<f64>() <= 0.0
        {
            return Err(CairnError::Config(
                "policy base weights must be non-negative with a positive sum".to_string(),
            ));
        }

        if self.reflection.failure_threshold > self.reflection.success_threshold {
            return Err(CairnError::Config(
                "reflection.failure_threshold must not exceed success_threshold".to_string(),
            ));
        }

        for (name, value) in [
            ("storage.embedding_dimension", self.storage.embedding_dimension),
            ("storage.cas_max_attempts", self.storage.cas_max_attempts as usize),
            ("structure.history_len", self.structure.history_len),
            ("dynamics.history_len", self.dynamics.history_len),
            ("policy.audit_log_len", self.policy.audit_log_len),
            ("search.candidates_per_strategy", self.search.candidates_per_strategy),
            ("search.default_limit", self.search.default_limit),
            ("gateway.cache_size", self.gateway.cache_size),
            ("budget.period_days", self.budget.period_days as usize),
        ] {
            if value == 0 {
                return Err(CairnError::Config(format!("{name} must be greater than 0")));
            }
        }

        for (name, value) in [
            ("budget.period_limit_usd", self.budget.period_limit_usd),
            ("policy.cost_full", self.policy.cost_full),
            ("policy.cost_lite", self.policy.cost_lite),
            ("policy.graph_boost", self.policy.graph_boost),
            ("policy.phrase_boost", self.policy.phrase_boost),
            ("policy.prune_drift_threshold", self.policy.prune_drift_threshold),
            ("policy.prune_mdi_threshold", self.policy.prune_mdi_threshold),
            ("dynamics.mdi_anomaly_threshold", self.dynamics.mdi_anomaly_threshold),
            (
                "dynamics.structural_drift_anomaly_threshold",
                self.dynamics.structural_drift_anomaly_threshold,
            ),
            ("search.rrf_k", self.search.rrf_k),
            ("search.phrase_bonus", self.search.phrase_bonus),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CairnError::Config(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }

        Ok(())
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backoff before the single retry of a failed backend call
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Attempts for compare-and-swap updates before giving up
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: u32,
    /// Expected embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            cas_max_attempts: default_cas_max_attempts(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_cas_max_attempts() -> u32 {
    8
}

fn default_embedding_dimension() -> usize {
    256
}

/// Memory lifecycle configuration. Rates are per day.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_sensory_decay_rate")]
    pub sensory_decay_rate: f64,
    #[serde(default = "default_working_decay_rate")]
    pub working_decay_rate: f64,
    #[serde(default = "default_long_term_decay_rate")]
    pub long_term_decay_rate: f64,
    #[serde(default = "default_reflective_decay_rate")]
    pub reflective_decay_rate: f64,
    /// Memories used within this window decay at the usage-adjusted rate
    #[serde(default = "default_protected_window_hours")]
    pub protected_window_hours: u64,
    #[serde(default = "default_sensory_access_boost")]
    pub sensory_access_boost: f64,
    #[serde(default = "default_working_access_boost")]
    pub working_access_boost: f64,
    #[serde(default = "default_long_term_access_boost")]
    pub long_term_access_boost: f64,
    #[serde(default = "default_reflective_access_boost")]
    pub reflective_access_boost: f64,
    /// Default TTL for sensory memories
    #[serde(default = "default_sensory_ttl_hours")]
    pub sensory_ttl_hours: u64,
    /// Default TTL for working memories
    #[serde(default = "default_working_ttl_hours")]
    pub working_ttl_hours: u64,
    /// Importance given to drafts that leave it unset
    #[serde(default = "default_importance")]
    pub default_importance: f64,
    /// Threshold used by the pruning worker
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    /// Reflective memories are only pruned below this floor
    #[serde(default = "default_reflective_prune_floor")]
    pub reflective_prune_floor: f64,
    /// Added to the mean source importance of a consolidated memory
    #[serde(default = "default_consolidation_bonus")]
    pub consolidation_bonus: f64,
    #[serde(default = "default_max_summary_sentences")]
    pub max_summary_sentences: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl LifecycleConfig {
    pub fn decay_rate(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Sensory => self.sensory_decay_rate,
            Layer::Working => self.working_decay_rate,
            Layer::LongTerm => self.long_term_decay_rate,
            Layer::Reflective => self.reflective_decay_rate,
        }
    }

    pub fn access_boost(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Sensory => self.sensory_access_boost,
            Layer::Working => self.working_access_boost,
            Layer::LongTerm => self.long_term_access_boost,
            Layer::Reflective => self.reflective_access_boost,
        }
    }

    pub fn default_ttl(&self, layer: Layer) -> Option<chrono::Duration> {
        match layer {
            Layer::Sensory => Some(chrono::Duration::hours(self.sensory_ttl_hours as i64)),
            Layer::Working => Some(chrono::Duration::hours(self.working_ttl_hours as i64)),
            Layer::LongTerm | Layer::Reflective => None,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            sensory_decay_rate: default_sensory_decay_rate(),
            working_decay_rate: default_working_decay_rate(),
            long_term_decay_rate: default_long_term_decay_rate(),
            reflective_decay_rate: default_reflective_decay_rate(),
            protected_window_hours: default_protected_window_hours(),
            sensory_access_boost: default_sensory_access_boost(),
            working_access_boost: default_working_access_boost(),
            long_term_access_boost: default_long_term_access_boost(),
            reflective_access_boost: default_reflective_access_boost(),
            sensory_ttl_hours: default_sensory_ttl_hours(),
            working_ttl_hours: default_working_ttl_hours(),
            default_importance: default_importance(),
            prune_threshold: default_prune_threshold(),
            reflective_prune_floor: default_reflective_prune_floor(),
            consolidation_bonus: default_consolidation_bonus(),
            max_summary_sentences: default_max_summary_sentences(),
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_sensory_decay_rate() -> f64 {
    1.0
}

fn default_working_decay_rate() -> f64 {
    0.2
}

fn default_long_term_decay_rate() -> f64 {
    0.02
}

fn default_reflective_decay_rate() -> f64 {
    0.001
}

fn default_protected_window_hours() -> u64 {
    72
}

fn default_sensory_access_boost() -> f64 {
    0.05
}

fn default_working_access_boost() -> f64 {
    0.1
}

fn default_long_term_access_boost() -> f64 {
    0.05
}

fn default_reflective_access_boost() -> f64 {
    0.02
}

fn default_sensory_ttl_hours() -> u64 {
    24
}

fn default_working_ttl_hours() -> u64 {
    24 * 7
}

fn default_importance() -> f64 {
    0.5
}

fn default_prune_threshold() -> f64 {
    0.1
}

fn default_reflective_prune_floor() -> f64 {
    0.01
}

fn default_consolidation_bonus() -> f64 {
    0.1
}

fn default_max_summary_sentences() -> usize {
    5
}

fn default_max_keywords() -> usize {
    8
}

/// Structure analyzer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StructureConfig {
    /// GCS below this flags a fragmented graph
    #[serde(default = "default_fragmentation_threshold")]
    pub fragmentation_threshold: f64,
    /// Snapshots retained per tenant
    #[serde(default = "default_structure_history_len")]
    pub history_len: usize,
    /// Shortest token accepted as an entity
    #[serde(default = "default_min_entity_len")]
    pub min_entity_len: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            fragmentation_threshold: default_fragmentation_threshold(),
            history_len: default_structure_history_len(),
            min_entity_len: default_min_entity_len(),
        }
    }
}

fn default_fragmentation_threshold() -> f64 {
    0.5
}

fn default_structure_history_len() -> usize {
    16
}

fn default_min_entity_len() -> usize {
    3
}

/// Dynamics tracker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicsConfig {
    /// Snapshots and retention samples retained per tenant
    #[serde(default = "default_dynamics_history_len")]
    pub history_len: usize,
    /// Percentile reported alongside the mean MDI
    #[serde(default = "default_mdi_percentile")]
    pub mdi_percentile: f64,
    /// Mean MDI above this raises a drift anomaly
    #[serde(default = "default_mdi_anomaly_threshold")]
    pub mdi_anomaly_threshold: f64,
    /// Structural drift above this raises a drift anomaly
    #[serde(default = "default_structural_drift_anomaly_threshold")]
    pub structural_drift_anomaly_threshold: f64,
    /// Samples needed before a retention curve is fitted
    #[serde(default = "default_min_retention_samples")]
    pub min_retention_samples: usize,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            history_len: default_dynamics_history_len(),
            mdi_percentile: default_mdi_percentile(),
            mdi_anomaly_threshold: default_mdi_anomaly_threshold(),
            structural_drift_anomaly_threshold: default_structural_drift_anomaly_threshold(),
            min_retention_samples: default_min_retention_samples(),
        }
    }
}

fn default_dynamics_history_len() -> usize {
    32
}

fn default_mdi_percentile() -> f64 {
    0.95
}

fn default_mdi_anomaly_threshold() -> f64 {
    0.3
}

fn default_structural_drift_anomaly_threshold() -> f64 {
    0.5
}

fn default_min_retention_samples() -> usize {
    3
}

/// Policy optimizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f64,
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f64,
    #[serde(default = "default_fulltext_weight")]
    pub fulltext_weight: f64,
    /// Topic GCS at or above this boosts graph retrieval
    #[serde(default = "default_graph_gcs_threshold")]
    pub graph_gcs_threshold: f64,
    #[serde(default = "default_graph_boost")]
    pub graph_boost: f64,
    /// Extra full-text weight for queries with a quoted phrase
    #[serde(default = "default_phrase_boost")]
    pub phrase_boost: f64,
    /// Remaining budget ratio below which cheap strategies are favoured
    #[serde(default = "default_low_budget_ratio")]
    pub low_budget_ratio: f64,
    /// Successes below this importance are not reflected on
    #[serde(default = "default_success_skip_importance")]
    pub success_skip_importance: f64,
    /// Patterns below this success rate still get a lite reflection
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    /// Estimated cost (USD) of a full reflection
    #[serde(default = "default_cost_full")]
    pub cost_full: f64,
    /// Estimated cost (USD) of a lite reflection
    #[serde(default)]
    pub cost_lite: f64,
    /// Treat a pattern with no gain history as having positive gain
    #[serde(default = "default_assume_positive_gain")]
    pub assume_positive_gain_without_history: bool,
    #[serde(default = "default_prune_gcs_threshold")]
    pub prune_gcs_threshold: f64,
    #[serde(default = "default_prune_drift_threshold")]
    pub prune_drift_threshold: f64,
    #[serde(default = "default_prune_mdi_threshold")]
    pub prune_mdi_threshold: f64,
    /// Decisions retained in the audit log
    #[serde(default = "default_audit_log_len")]
    pub audit_log_len: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            graph_weight: default_graph_weight(),
            sparse_weight: default_sparse_weight(),
            fulltext_weight: default_fulltext_weight(),
            graph_gcs_threshold: default_graph_gcs_threshold(),
            graph_boost: default_graph_boost(),
            phrase_boost: default_phrase_boost(),
            low_budget_ratio: default_low_budget_ratio(),
            success_skip_importance: default_success_skip_importance(),
            min_success_rate: default_min_success_rate(),
            cost_full: default_cost_full(),
            cost_lite: 0.0,
            assume_positive_gain_without_history: default_assume_positive_gain(),
            prune_gcs_threshold: default_prune_gcs_threshold(),
            prune_drift_threshold: default_prune_drift_threshold(),
            prune_mdi_threshold: default_prune_mdi_threshold(),
            audit_log_len: default_audit_log_len(),
        }
    }
}

fn default_vector_weight() -> f64 {
    0.4
}

fn default_graph_weight() -> f64 {
    0.2
}

fn default_sparse_weight() -> f64 {
    0.2
}

fn default_fulltext_weight() -> f64 {
    0.2
}

fn default_graph_gcs_threshold() -> f64 {
    0.5
}

fn default_graph_boost() -> f64 {
    0.2
}

fn default_phrase_boost() -> f64 {
    0.1
}

fn default_low_budget_ratio() -> f64 {
    0.2
}

fn default_success_skip_importance() -> f64 {
    0.5
}

fn default_min_success_rate() -> f64 {
    0.7
}

fn default_cost_full() -> f64 {
    0.02
}

fn default_assume_positive_gain() -> bool {
    true
}

fn default_prune_gcs_threshold() -> f64 {
    0.5
}

fn default_prune_drift_threshold() -> f64 {
    0.5
}

fn default_prune_mdi_threshold() -> f64 {
    0.3
}

fn default_audit_log_len() -> usize {
    256
}

/// Budget ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Spend allowed per tenant per period
    #[serde(default = "default_period_limit_usd")]
    pub period_limit_usd: f64,
    /// Billing period length
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    /// Spend ratio at which a warning is raised
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            period_limit_usd: default_period_limit_usd(),
            period_days: default_period_days(),
            warning_ratio: default_warning_ratio(),
        }
    }
}

fn default_period_limit_usd() -> f64 {
    10.0
}

fn default_period_days() -> u32 {
    30
}

fn default_warning_ratio() -> f64 {
    0.8
}

/// Hybrid search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Overall time budget for the strategy fan-out
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,
    /// Ranked candidates requested from each strategy
    #[serde(default = "default_candidates_per_strategy")]
    pub candidates_per_strategy: usize,
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    /// Full-text bonus for an exact phrase match
    #[serde(default = "default_phrase_bonus")]
    pub phrase_bonus: f64,
    /// Graph traversal depth from seed entities
    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,
    #[serde(default = "default_max_seeds")]
    pub max_seeds: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            strategy_timeout_ms: default_strategy_timeout_ms(),
            candidates_per_strategy: default_candidates_per_strategy(),
            default_limit: default_search_limit(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            phrase_bonus: default_phrase_bonus(),
            graph_depth: default_graph_depth(),
            max_seeds: default_max_seeds(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_strategy_timeout_ms() -> u64 {
    500
}

fn default_candidates_per_strategy() -> usize {
    50
}

fn default_search_limit() -> usize {
    10
}

fn default_bm25_k1() -> f64 {
    1.2
}

fn default_bm25_b() -> f64 {
    0.75
}

fn default_phrase_bonus() -> f64 {
    0.5
}

fn default_graph_depth() -> usize {
    2
}

fn default_max_seeds() -> usize {
    8
}

/// Which evaluator labels outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// Use the outcome's own success signal
    #[default]
    Deterministic,
    /// Compare the outcome score against thresholds
    Threshold,
    /// Score the result text with the quality scorer
    Scorer,
}

/// Reflection engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReflectionConfig {
    #[serde(default)]
    pub evaluator: EvaluatorKind,
    /// Scores at or above this are a success
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// Scores at or below this are a failure
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// Deadline for a model gateway call during full reflection
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    /// Settled reflection records are forgotten after this many hours
    #[serde(default = "default_record_retention_hours")]
    pub record_retention_hours: u64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorKind::default(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            gateway_timeout_ms: default_gateway_timeout_ms(),
            record_retention_hours: default_record_retention_hours(),
        }
    }
}

fn default_success_threshold() -> f64 {
    0.7
}

fn default_failure_threshold() -> f64 {
    0.3
}

fn default_gateway_timeout_ms() -> u64 {
    5000
}

fn default_record_retention_hours() -> u64 {
    168
}

/// Model gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Strategy mode: none, single, fallback, or ensemble
    #[serde(default = "default_gateway_mode")]
    pub mode: String,
    /// Provider names, in priority order
    #[serde(default)]
    pub models: Vec<String>,
    /// Cached completions
    #[serde(default = "default_gateway_cache_size")]
    pub cache_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: default_gateway_mode(),
            models: Vec::new(),
            cache_size: default_gateway_cache_size(),
        }
    }
}

fn default_gateway_mode() -> String {
    "none".to_string()
}

fn default_gateway_cache_size() -> usize {
    128
}

/// Background worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Tenants the daemon schedules workers for
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_consolidation_interval_secs")]
    pub consolidation_interval_secs: u64,
    /// Sessions idle this long are consolidated
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: u64,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_reflection_interval_secs")]
    pub reflection_interval_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            decay_interval_secs: default_decay_interval_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            consolidation_interval_secs: default_consolidation_interval_secs(),
            session_idle_minutes: default_session_idle_minutes(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            reflection_interval_secs: default_reflection_interval_secs(),
        }
    }
}

fn default_decay_interval_secs() -> u64 {
    3600
}

fn default_prune_interval_secs() -> u64 {
    3600
}

fn default_consolidation_interval_secs() -> u64 {
    900
}

fn default_session_idle_minutes() -> u64 {
    30
}

fn default_snapshot_interval_secs() -> u64 {
    600
}

fn default_reflection_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.lifecycle.default_importance, 0.5);
        assert_eq!(config.structure.fragmentation_threshold, 0.5);
        assert_eq!(config.policy.min_success_rate, 0.7);
        assert_eq!(config.budget.warning_ratio, 0.8);
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.gateway.mode, "none");
        assert!(config.workers.tenants.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layer_lookups() {
        let lc = LifecycleConfig::default();
        assert!(lc.decay_rate(Layer::Sensory) > lc.decay_rate(Layer::Working));
        assert!(lc.decay_rate(Layer::LongTerm) > lc.decay_rate(Layer::Reflective));
        assert_eq!(lc.default_ttl(Layer::Sensory), Some(chrono::Duration::hours(24)));
        assert!(lc.default_ttl(Layer::Reflective).is_none());
        assert_eq!(lc.access_boost(Layer::Working), 0.1);
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[lifecycle]
working_decay_rate = 0.5

[reflection]
evaluator = "threshold"

[gateway]
mode = "fallback"
models = ["primary", "backup"]
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.lifecycle.working_decay_rate, 0.5);
        assert_eq!(config.lifecycle.sensory_decay_rate, 1.0);
        assert_eq!(config.reflection.evaluator, EvaluatorKind::Threshold);
        assert_eq!(config.gateway.models, vec!["primary", "backup"]);
        assert_eq!(config.search.strategy_timeout_ms, 500);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.lifecycle.working_decay_rate = -1.0;
        assert!(matches!(config.validate(), Err(CairnError::Config(_))));

        let mut config = Config::default();
        config.budget.warning_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reflection.failure_threshold = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.policy.vector_weight = 0.0;
        config.policy.graph_weight = 0.0;
        config.policy.sparse_weight = 0.0;
        config.policy.fulltext_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_amounts() {
        let setters: [fn(&mut Config, f64); 5] = [
            |c, v| c.budget.period_limit_usd = v,
            |c, v| c.policy.cost_full = v,
            |c, v| c.policy.cost_lite = v,
            |c, v| c.policy.graph_boost = v,
            |c, v| c.policy.phrase_boost = v,
        ];
        for set in setters {
            for bad in [f64::NAN, f64::INFINITY, -0.01] {
                let mut config = Config::default();
                set(&mut config, bad);
                assert!(
                    matches!(config.validate(), Err(CairnError::Config(_))),
                    "accepted {bad}"
                );
            }
        }

        let mut config = Config::default();
        config.policy.cost_lite = 0.0;
        config.budget.period_limit_usd = 0.0;
        assert!(config.validate().is_ok());
    }
}
