//! Engine configuration schema.
//!
//! Pure data: parsing from a file lives in the store crate. Every section
//! has defaults, so a partial document (or none at all) is valid. Call
//! [`EngineConfig::validate`] before building components; nothing here is
//! clamped into range.

use serde::{Deserialize, Serialize};

use crate::constants::{
    ACTIVE_THRESHOLD, DEFAULT_DECAY_THRESHOLD, DEFAULT_FULL_REOPTIMIZE_INTERVAL,
    DEFAULT_TOKEN_BUDGET, DEFAULT_TTL_SECS, DEFAULT_WINDOW_SIZE, DUPLICATE_SIMILARITY,
    READY_THRESHOLD,
};
use crate::error::ConfigError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pruning: PruningConfig,
    pub decay: DecayConfig,
    pub states: StateConfig,
    pub realtime: RealtimeConfig,
    pub btsp: BtspConfig,
    pub consolidation: ConsolidationConfig,
}

/// One-shot pruning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    pub token_budget: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// TTL given to freshly parsed entries.
    pub default_ttl_secs: u64,
    /// Decay at or above which consolidation purges an entry.
    pub threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            threshold: DEFAULT_DECAY_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub active_threshold: f64,
    pub ready_threshold: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            active_threshold: ACTIVE_THRESHOLD,
            ready_threshold: READY_THRESHOLD,
        }
    }
}

/// Streaming pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub token_budget: usize,
    pub window_size: usize,
    pub full_reoptimize_interval: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            window_size: DEFAULT_WINDOW_SIZE,
            full_reoptimize_interval: DEFAULT_FULL_REOPTIMIZE_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BtspConfig {
    /// Extra critical-event regexes. Invalid ones are skipped.
    pub custom_patterns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub similarity_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DUPLICATE_SIMILARITY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.states.validate()?;
        if !(self.decay.threshold > 0.0 && self.decay.threshold <= 1.0) {
            return Err(ConfigError::DecayThreshold(self.decay.threshold));
        }
        let sim = self.consolidation.similarity_threshold;
        if !(sim > 0.0 && sim <= 1.0) {
            return Err(ConfigError::SimilarityThreshold(sim));
        }
        if self.realtime.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.realtime.full_reoptimize_interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}

impl StateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("active_threshold", self.active_threshold)?;
        check_unit("ready_threshold", self.ready_threshold)?;
        if self.ready_threshold > self.active_threshold {
            return Err(ConfigError::ThresholdOrder {
                ready: self.ready_threshold,
                active: self.active_threshold,
            });
        }
        Ok(())
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}
