//! Engram scorer: exponential freshness decay.
//!
//! An entry loses `1 - e^(-age/ttl)` of its score with age, regains a
//! little for every access (logarithmic, diminishing), and critical entries
//! never fall below [`BTSP_SCORE_FLOOR`]. All functions are pure.

use crate::config::DecayConfig;
use crate::constants::{ACCESS_BONUS_WEIGHT, BTSP_SCORE_FLOOR};
use crate::entry::{Entry, clamp_unit};
use crate::time::age_secs;

/// Fraction of score lost to age, in [0, 1].
///
/// Zero for non-positive ages; a TTL of zero means instant decay.
pub fn decay(age_secs: f64, ttl_secs: f64) -> f64 {
    if age_secs <= 0.0 || age_secs.is_nan() {
        return 0.0;
    }
    if ttl_secs <= 0.0 {
        return 1.0;
    }
    clamp_unit(1.0 - (-age_secs / ttl_secs).exp())
}

/// Decay of an entry at `now` (Unix ms), using the entry's own TTL.
pub fn entry_decay(entry: &Entry, now: u64) -> f64 {
    decay(age_secs(entry.timestamp, now), entry.ttl_secs as f64)
}

/// Logarithmic bonus for repeated access.
pub fn access_bonus(access_count: u32) -> f64 {
    (access_count as f64 + 1.0).ln() * ACCESS_BONUS_WEIGHT
}

#[derive(Clone, Debug, Default)]
pub struct EngramScorer {
    config: DecayConfig,
}

impl EngramScorer {
    pub fn new(config: DecayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Freshness score of `entry` at `now`, in [0, 1].
    pub fn score(&self, entry: &Entry, now: u64) -> f64 {
        let base = entry.score * (1.0 - entry_decay(entry, now));
        let mut score = (base + access_bonus(entry.access_count)).min(1.0);
        if entry.critical {
            score = score.max(BTSP_SCORE_FLOOR);
        }
        clamp_unit(score)
    }

    /// Copy of `entry` carrying its decayed score.
    pub fn apply(&self, entry: &Entry, now: u64) -> Entry {
        entry.clone().with_score(self.score(entry, now))
    }

    /// Whether the entry has decayed past the configured threshold.
    /// Critical entries never do.
    pub fn is_decayed(&self, entry: &Entry, now: u64) -> bool {
        !entry.critical && entry_decay(entry, now) >= self.config.threshold
    }

    /// Record a re-use: access count +1, age reset to `now`.
    pub fn refresh(&self, entry: &Entry, now: u64) -> Entry {
        entry
            .clone()
            .with_timestamp(now)
            .with_access_count(entry.access_count.saturating_add(1))
    }
}
