//! Error types for engine construction and snapshot restore.
//!
//! Scoring, classification and pruning are total over well-formed input and
//! never return errors; only configuration and restored state can be invalid.

/// Rejected configuration. Values are never silently clamped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("ready threshold {ready} must not exceed active threshold {active}")]
    ThresholdOrder { ready: f64, active: f64 },

    #[error("decay threshold must be within (0, 1], got {0}")]
    DecayThreshold(f64),

    #[error("similarity threshold must be within (0, 1], got {0}")]
    SimilarityThreshold(f64),

    #[error("window size must be at least 1")]
    ZeroWindow,

    #[error("full reoptimize interval must be at least 1")]
    ZeroInterval,
}

/// A snapshot that cannot be applied. The caller falls back to a cold state.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("snapshot is inconsistent: {0}")]
    Inconsistent(String),
}
