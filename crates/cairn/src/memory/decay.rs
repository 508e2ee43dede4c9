//! Importance decay
//!
//! Importance fades exponentially with time since the last decay
//! application: `importance * exp(-λ * Δt_days)`. Each layer has its own
//! rate, and memories used within the protected window decay at a
//! usage-adjusted rate `λ / (ln(1 + usage_count) + 1)`.

use chrono::{DateTime, Duration, Utc};

use crate::config::LifecycleConfig;
use crate::memory::types::Memory;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Fractional days between two instants, never negative
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
}

/// The decay rate that applies to this memory right now
pub fn effective_rate(memory: &Memory, config: &LifecycleConfig, now: DateTime<Utc>) -> f64 {
    let base = config.decay_rate(memory.layer);
    let window = Duration::hours(config.protected_window_hours as i64);
    let recently_used = memory.usage_count > 0 && now - memory.last_accessed_at <= window;

    if recently_used {
        base / ((1.0 + memory.usage_count as f64).ln() + 1.0)
    } else {
        base
    }
}

/// Multiplicative decay factor for a rate over a span of days
pub fn decay_factor(rate: f64, days: f64) -> f64 {
    (-rate * days).exp()
}

/// Apply decay accumulated since `decayed_at`. Returns true if the
/// memory changed.
pub fn apply_decay(memory: &mut Memory, config: &LifecycleConfig, now: DateTime<Utc>) -> bool {
    let days = elapsed_days(memory.decayed_at, now);
    if days <= 0.0 {
        return false;
    }

    let rate = effective_rate(memory, config, now);
    memory.set_importance(memory.importance * decay_factor(rate, days));
    memory.decayed_at = now;
    true
}

/// Days for importance to halve at this rate
pub fn half_life_days(rate: f64) -> f64 {
    if rate <= 0.0 {
        f64::INFINITY
    } else {
        std::f64::consts::LN_2 / rate
    }
}

/// Rate that halves importance over the given number of days
pub fn rate_from_half_life(days: f64) -> f64 {
    if days <= 0.0 || !days.is_finite() {
        0.0
    } else {
        std::f64::consts::LN_2 / days
    }
}
