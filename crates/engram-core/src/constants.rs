/// Score floor for critical (BTSP) entries; decay never takes them below this.
pub const BTSP_SCORE_FLOOR: f64 = 0.9;

/// Time-to-live assigned to entries marked critical: one year in seconds.
pub const BTSP_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Default entry time-to-live: 24 hours in seconds.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Decay at or above which the sleep compressor purges an entry.
pub const DEFAULT_DECAY_THRESHOLD: f64 = 0.95;

/// Weight of the logarithmic access bonus: `ln(access_count + 1) * ACCESS_BONUS_WEIGHT`.
pub const ACCESS_BONUS_WEIGHT: f64 = 0.1;

/// Score at or above which an entry is `Active`.
pub const ACTIVE_THRESHOLD: f64 = 0.7;

/// Score at or above which an entry is `Ready`.
pub const READY_THRESHOLD: f64 = 0.3;

/// Priority multiplier for critical or active entries.
pub const ACTIVE_MULTIPLIER: f64 = 2.0;

/// Priority multiplier for ready entries.
pub const READY_MULTIPLIER: f64 = 1.0;

/// Priority multiplier for silent entries.
pub const SILENT_MULTIPLIER: f64 = 0.5;

/// Default token budget for a single optimization pass.
pub const DEFAULT_TOKEN_BUDGET: usize = 40_000;

/// Default sliding-window size of the streaming pipeline (entries).
pub const DEFAULT_WINDOW_SIZE: usize = 500;

/// Incremental calls between forced full recomputations.
pub const DEFAULT_FULL_REOPTIMIZE_INTERVAL: u64 = 50;

/// Hybrid window score: weight of normalized age (1.0 = newest).
pub const WINDOW_AGE_WEIGHT: f64 = 0.4;

/// Hybrid window score: weight of the entry's relevance score.
pub const WINDOW_RELEVANCE_WEIGHT: f64 = 0.6;

/// Hybrid window score given to critical entries; exceeds any regular score.
pub const WINDOW_CRITICAL_SCORE: f64 = 2.0;

/// Cosine similarity at or above which two entries are near-duplicates.
pub const DUPLICATE_SIMILARITY: f64 = 0.85;

/// Average characters per token for budget estimation.
pub const CHARS_PER_TOKEN: f64 = 4.0;
