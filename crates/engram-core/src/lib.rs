//! Engram context engine.
//!
//! Keeps a bounded, relevance-ranked working set of context fragments for
//! an agent session. New fragments are admitted continuously; the least
//! valuable are evicted so the working set never exceeds a token budget.
//!
//! Scoring combines exponential time decay, confidence states and TF-IDF
//! relevance. Critical events (errors, stack traces, conflicts) bypass
//! decay and are kept whenever anything can be kept.
//!
//! Zero I/O: persistence, parsing and metrics are injected collaborators.

pub mod btsp;
pub mod budget;
pub mod confidence;
pub mod config;
pub mod constants;
pub mod engram;
pub mod entry;
pub mod error;
pub mod incremental;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod sleep;
pub mod snapshot;
pub mod storage;
pub mod tfidf;
pub mod time;
pub mod tokenizer;

pub use btsp::CriticalEventDetector;
pub use budget::{BudgetPruner, Candidate, PruneResult, priority};
pub use confidence::{ConfidenceClassifier, state_multiplier};
pub use config::{
    BtspConfig, ConsolidationConfig, DecayConfig, EngineConfig, PruningConfig, RealtimeConfig,
    StateConfig,
};
pub use engram::{EngramScorer, decay};
pub use entry::{ConfidenceState, Entry, content_hash};
pub use error::{ConfigError, SnapshotError};
pub use incremental::{CachedScore, IncrementalOptimizer, OptimizeOutcome, OptimizerStats};
pub use metrics::{MetricsCollector, MetricsSink, MetricsSummary, NoopMetrics, OptimizationMetrics};
pub use parser::{EntryParser, ParagraphParser};
pub use pipeline::{ContextPipeline, IngestResult, PipelineStats};
pub use sleep::{ConsolidateResult, SleepCompressor};
pub use snapshot::{OptimizerSnapshot, PipelineSnapshot, SNAPSHOT_VERSION, export_json, import_json};
pub use storage::{EntryStore, OptimizationRecord, StorageError};
pub use tfidf::{RelevanceIndex, cosine_similarity};
pub use tokenizer::{estimate_tokens, tokenize};
