//! Dynamics tracker
//!
//! Measures how a tenant's memory changes over time: embedding drift per
//! memory (MDI), edge-set drift between structure snapshots, the shape of
//! memory survival (retention curve), whether reflections help (reflection
//! gain) and how much consolidation keeps (CFR). A metric without enough
//! history is reported as [`Metric::InsufficientHistory`], never guessed.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::DynamicsConfig;
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::math::structure::{StructureAnalyzer, StructureSnapshot};
use crate::memory::decay::{elapsed_days, half_life_days};
use crate::memory::{Memory, MemoryFilter, MemoryId, MemoryStore};
use crate::text;

/// A measured value, or an explicit marker that history is too short
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric<T> {
    Value(T),
    InsufficientHistory,
}

impl<T> Metric<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Metric::Value(v) => Some(v),
            Metric::InsufficientHistory => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Metric::InsufficientHistory)
    }
}

impl<T> From<Option<T>> for Metric<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Metric::InsufficientHistory, Metric::Value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MdiSummary {
    pub mean: f64,
    pub percentile: f64,
    pub max: f64,
    pub tracked: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum RetentionModel {
    /// `N(t) = e^intercept · e^(-rate·t)`
    Exponential { intercept: f64, rate: f64 },
    /// `N(t) = e^intercept · (1 + t)^(-exponent)`
    PowerLaw { intercept: f64, exponent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetentionCurve {
    pub model: RetentionModel,
    pub r_squared: f64,
    pub samples: usize,
    /// Only defined for a decaying exponential fit
    pub half_life_days: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReflectionGainSummary {
    pub mean_gain: f64,
    pub samples: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DynamicsAlert {
    NegativeReflectionGain { pattern: String, gain: f64 },
    DriftAnomaly { metric: String, value: f64, threshold: f64 },
}

impl DynamicsAlert {
    pub fn describe(&self) -> String {
        match self {
            DynamicsAlert::NegativeReflectionGain { pattern, gain } => {
                format!("reflection for pattern '{pattern}' reduced quality (gain {gain:.3})")
            }
            DynamicsAlert::DriftAnomaly {
                metric,
                value,
                threshold,
            } => format!("{metric} is {value:.3}, above the {threshold:.3} limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicsSnapshot {
    pub tenant_id: String,
    pub taken_at: DateTime<Utc>,
    pub window_secs: i64,
    pub mdi: Metric<MdiSummary>,
    pub structural_drift: Metric<f64>,
    pub retention_curve: Metric<RetentionCurve>,
    pub reflection_gain: Metric<ReflectionGainSummary>,
    pub cfr: Metric<f64>,
    pub alerts: Vec<DynamicsAlert>,
}

/// Reflection track record of one action pattern
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ReflectionHistory {
    pub mean_gain: Option<f64>,
    pub gain_samples: usize,
    pub success_rate: Option<f64>,
    pub attempts: usize,
}

#[derive(Debug, Default)]
struct PatternStats {
    gain_sum: f64,
    gain_samples: usize,
    successes: usize,
    attempts: usize,
}

#[derive(Debug, Default)]
struct TenantDynamics {
    baselines: HashMap<MemoryId, Vec<f32>>,
    retention: VecDeque<(DateTime<Utc>, usize)>,
    gains: VecDeque<(DateTime<Utc>, f64)>,
    patterns: HashMap<String, PatternStats>,
    pending_alerts: Vec<DynamicsAlert>,
}

/// `1 - cos(now, baseline)`
pub fn memory_drift_index(baseline: &[f32], current: &[f32]) -> f64 {
    1.0 - cosine_similarity(baseline, current)
}

/// `|E(t) Δ E(t-Δ)| / |E(t-Δ)|`; `None` if the baseline has no edges
pub fn structural_drift(current: &StructureSnapshot, baseline: &StructureSnapshot) -> Option<f64> {
    if baseline.edge_keys.is_empty() {
        return None;
    }
    let changed = current
        .edge_keys
        .symmetric_difference(&baseline.edge_keys)
        .count();
    Some(changed as f64 / baseline.edge_keys.len() as f64)
}

/// Nearest-rank percentile of unsorted values, `p` in [0, 1]
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Ordinary least squares `y = a + b·x`, returning `(a, b, r²)`
fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<(f64, f64, f64)> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let b = sxy / sxx;
    let a = mean_y - b * mean_x;

    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (a + b * x)).powi(2))
        .sum();
    let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
    Some((a, b, r2))
}

/// Fit `(days, survivors)` samples to exponential and power-law decay and
/// keep the better fit. Needs `min_samples` points with positive counts
/// spread over time.
pub fn fit_retention_curve(samples: &[(f64, usize)], min_samples: usize) -> Option<RetentionCurve> {
    let usable: Vec<(f64, f64)> = samples
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(t, n)| (*t, (*n as f64).ln()))
        .collect();
    if usable.len() < min_samples.max(2) {
        return None;
    }

    let ts: Vec<f64> = usable.iter().map(|(t, _)| *t).collect();
    let ys: Vec<f64> = usable.iter().map(|(_, y)| *y).collect();
    let log_ts: Vec<f64> = ts.iter().map(|t| (1.0 + t).ln()).collect();

    let (ea, eb, er2) = linear_fit(&ts, &ys)?;
    let (pa, pb, pr2) = linear_fit(&log_ts, &ys)?;

    let curve = if pr2 > er2 {
        RetentionCurve {
            model: RetentionModel::PowerLaw {
                intercept: pa,
                exponent: -pb,
            },
            r_squared: pr2,
            samples: usable.len(),
            half_life_days: None,
        }
    } else {
        let rate = -eb;
        RetentionCurve {
            model: RetentionModel::Exponential {
                intercept: ea,
                rate,
            },
            r_squared: er2,
            samples: usable.len(),
            half_life_days: (rate > 0.0).then(|| half_life_days(rate)),
        }
    };
    Some(curve)
}

/// Information kept by a consolidated memory: overlap of its key terms
/// with the sources', divided by the sources' normalised token entropy
pub fn compression_fidelity(consolidated: &Memory, sources: &[Memory]) -> Option<f64> {
    let source_tokens: Vec<String> = sources
        .iter()
        .flat_map(|m| text::content_terms(&m.content, 3))
        .collect();
    let source_terms = text::distinct(&source_tokens);
    if source_terms.is_empty() {
        return None;
    }

    let consolidated_tokens = text::content_terms(&consolidated.content, 3);
    let consolidated_terms = text::distinct(&consolidated_tokens);
    let overlap = source_terms.intersection(&consolidated_terms).count() as f64
        / source_terms.len() as f64;

    let normalised_entropy = if source_terms.len() > 1 {
        text::token_entropy(&source_tokens) / (source_terms.len() as f64).log2()
    } else {
        1.0
    };

    Some((overlap / normalised_entropy.max(f64::EPSILON)).clamp(0.0, 1.0))
}

pub struct DynamicsTracker {
    store: Arc<MemoryStore>,
    structure: Arc<StructureAnalyzer>,
    config: DynamicsConfig,
    tenants: DashMap<String, TenantDynamics>,
    latest: DashMap<String, Arc<DynamicsSnapshot>>,
}

impl DynamicsTracker {
    pub fn new(
        store: Arc<MemoryStore>,
        structure: Arc<StructureAnalyzer>,
        config: DynamicsConfig,
    ) -> Self {
        Self {
            store,
            structure,
            config,
            tenants: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DynamicsConfig {
        &self.config
    }

    /// Compute a dynamics snapshot over the given window
    pub async fn track_dynamics(
        &self,
        tenant_id: &str,
        window: Duration,
    ) -> Result<Arc<DynamicsSnapshot>> {
        let now = Utc::now();
        let since = now - window;
        let memories = self.store.query(&MemoryFilter::new(), tenant_id).await?;
        let structural_drift = self.structural_drift_since(tenant_id, since);
        let cfr = Self::mean_cfr(&memories);

        let mut state = self.tenants.entry(tenant_id.to_string()).or_default();

        // MDI against baselines captured on first observation
        let live: HashSet<MemoryId> = memories.iter().map(|m| m.id).collect();
        state.baselines.retain(|id, _| live.contains(id));
        let mut drifts = Vec::new();
        for memory in &memories {
            let Some(ref embedding) = memory.embedding else {
                continue;
            };
            match state.baselines.entry(memory.id) {
                Entry::Occupied(baseline) => {
                    drifts.push(memory_drift_index(baseline.get(), embedding))
                }
                Entry::Vacant(slot) => {
                    slot.insert(embedding.clone());
                }
            }
        }
        let mdi = if drifts.is_empty() {
            Metric::InsufficientHistory
        } else {
            Metric::Value(MdiSummary {
                mean: drifts.iter().sum::<f64>() / drifts.len() as f64,
                percentile: percentile(&drifts, self.config.mdi_percentile),
                max: drifts.iter().copied().fold(0.0, f64::max),
                tracked: drifts.len(),
            })
        };

        state.retention.push_back((now, memories.len()));
        while state.retention.len() > self.config.history_len {
            state.retention.pop_front();
        }
        let retention_curve: Metric<RetentionCurve> = match state.retention.front() {
            Some(&(origin, _)) => {
                let samples: Vec<(f64, usize)> = state
                    .retention
                    .iter()
                    .filter(|(at, _)| *at >= since)
                    .map(|(at, n)| (elapsed_days(origin, *at), *n))
                    .collect();
                fit_retention_curve(&samples, self.config.min_retention_samples).into()
            }
            None => Metric::InsufficientHistory,
        };

        let gains: Vec<f64> = state
            .gains
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, g)| *g)
            .collect();
        let reflection_gain = if gains.is_empty() {
            Metric::InsufficientHistory
        } else {
            Metric::Value(ReflectionGainSummary {
                mean_gain: gains.iter().sum::<f64>() / gains.len() as f64,
                samples: gains.len(),
                negative: gains.iter().filter(|g| **g < 0.0).count(),
            })
        };

        let mut alerts = std::mem::take(&mut state.pending_alerts);
        drop(state);

        if let Metric::Value(summary) = mdi {
            if summary.mean > self.config.mdi_anomaly_threshold {
                alerts.push(DynamicsAlert::DriftAnomaly {
                    metric: "memory_drift_index".to_string(),
                    value: summary.mean,
                    threshold: self.config.mdi_anomaly_threshold,
                });
            }
        }
        if let Some(&drift) = structural_drift.value() {
            if drift > self.config.structural_drift_anomaly_threshold {
                alerts.push(DynamicsAlert::DriftAnomaly {
                    metric: "structural_drift".to_string(),
                    value: drift,
                    threshold: self.config.structural_drift_anomaly_threshold,
                });
            }
        }
        for alert in &alerts {
            tracing::warn!(tenant_id, alert = %alert.describe(), "Dynamics alert");
        }

        let snapshot = Arc::new(DynamicsSnapshot {
            tenant_id: tenant_id.to_string(),
            taken_at: now,
            window_secs: window.num_seconds(),
            mdi,
            structural_drift,
            retention_curve,
            reflection_gain,
            cfr,
            alerts,
        });
        self.latest.insert(tenant_id.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    /// Compare the latest structure snapshot against the newest one taken
    /// at or before `since`, falling back to the one right before it
    fn structural_drift_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Metric<f64> {
        let history = self.structure.history(tenant_id);
        let Some((current, earlier)) = history.split_last() else {
            return Metric::InsufficientHistory;
        };
        let baseline = earlier
            .iter()
            .rev()
            .find(|s| s.taken_at <= since)
            .or_else(|| earlier.last());
        baseline
            .and_then(|b| structural_drift(current, b))
            .into()
    }

    fn mean_cfr(memories: &[Memory]) -> Metric<f64> {
        let by_id: HashMap<MemoryId, &Memory> = memories.iter().map(|m| (m.id, m)).collect();
        let ratios: Vec<f64> = memories
            .iter()
            .filter(|m| !m.source_ids.is_empty())
            .filter_map(|m| {
                let sources: Vec<Memory> = m
                    .source_ids
                    .iter()
                    .filter_map(|id| by_id.get(id).map(|s| (*s).clone()))
                    .collect();
                if sources.is_empty() {
                    None
                } else {
                    compression_fidelity(m, &sources)
                }
            })
            .collect();

        if ratios.is_empty() {
            Metric::InsufficientHistory
        } else {
            Metric::Value(ratios.iter().sum::<f64>() / ratios.len() as f64)
        }
    }

    /// Record quality measured before and after a reflection was used.
    /// Returns the gain, or `None` when the baseline quality is not a
    /// positive finite number.
    pub fn record_reflection_gain(
        &self,
        tenant_id: &str,
        pattern: &str,
        quality_before: f64,
        quality_after: f64,
    ) -> Option<f64> {
        if !quality_before.is_finite() || quality_before <= 0.0 || !quality_after.is_finite() {
            tracing::debug!(tenant_id, pattern, quality_before, "Skipping reflection gain without positive baseline");
            return None;
        }
        let gain = (quality_after - quality_before) / quality_before;

        let mut state = self.tenants.entry(tenant_id.to_string()).or_default();
        state.gains.push_back((Utc::now(), gain));
        while state.gains.len() > self.config.history_len {
            state.gains.pop_front();
        }
        let stats = state.patterns.entry(pattern.to_string()).or_default();
        stats.gain_sum += gain;
        stats.gain_samples += 1;

        if gain < 0.0 {
            tracing::warn!(tenant_id, pattern, gain, "Reflection reduced quality");
            state.pending_alerts.push(DynamicsAlert::NegativeReflectionGain {
                pattern: pattern.to_string(),
                gain,
            });
        }
        Some(gain)
    }

    /// Count an evaluated outcome towards its pattern's success rate
    pub fn record_outcome(&self, tenant_id: &str, pattern: &str, success: bool) {
        let mut state = self.tenants.entry(tenant_id.to_string()).or_default();
        let stats = state.patterns.entry(pattern.to_string()).or_default();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
    }

    pub fn pattern_history(&self, tenant_id: &str, pattern: &str) -> ReflectionHistory {
        let Some(state) = self.tenants.get(tenant_id) else {
            return ReflectionHistory::default();
        };
        let Some(stats) = state.patterns.get(pattern) else {
            return ReflectionHistory::default();
        };
        ReflectionHistory {
            mean_gain: (stats.gain_samples > 0).then(|| stats.gain_sum / stats.gain_samples as f64),
            gain_samples: stats.gain_samples,
            success_rate: (stats.attempts > 0)
                .then(|| stats.successes as f64 / stats.attempts as f64),
            attempts: stats.attempts,
        }
    }

    /// Current drift of one memory, if its baseline has been captured
    pub async fn memory_drift(&self, tenant_id: &str, id: MemoryId) -> Result<Option<f64>> {
        let Some(memory) = self.store.get(id, tenant_id).await? else {
            return Ok(None);
        };
        let Some(state) = self.tenants.get(tenant_id) else {
            return Ok(None);
        };
        Ok(match (state.baselines.get(&id), memory.embedding.as_ref()) {
            (Some(baseline), Some(current)) => Some(memory_drift_index(baseline, current)),
            _ => None,
        })
    }

    pub fn latest(&self, tenant_id: &str) -> Option<Arc<DynamicsSnapshot>> {
        self.latest.get(tenant_id).map(|s| s.clone())
    }
}
