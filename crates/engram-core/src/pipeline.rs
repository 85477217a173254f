//! Streaming context pipeline.
//!
//! Raw text goes through the parser collaborator, each new entry is scored
//! and classified, the batch is handed to the incremental optimizer under
//! the token budget, and the survivors are capped to the window size by a
//! hybrid age/relevance score. Retention is relevance-driven but readers
//! always see entries in chronological order.
//!
//! A pipeline is single-owner: no internal locking, one caller at a time.
//! Independent pipelines share nothing and can run in parallel.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::btsp::CriticalEventDetector;
use crate::confidence::ConfidenceClassifier;
use crate::config::{EngineConfig, RealtimeConfig};
use crate::constants::{WINDOW_AGE_WEIGHT, WINDOW_CRITICAL_SCORE, WINDOW_RELEVANCE_WEIGHT};
use crate::engram::EngramScorer;
use crate::entry::Entry;
use crate::error::{ConfigError, SnapshotError};
use crate::incremental::{IncrementalOptimizer, OptimizerStats};
use crate::metrics::{MetricsSink, NoopMetrics, OptimizationMetrics};
use crate::parser::{EntryParser, ParagraphParser};
use crate::snapshot::{self, PipelineSnapshot, SNAPSHOT_VERSION};
use crate::storage::{EntryStore, OptimizationRecord};
use crate::time::now_unix_millis;

/// Outcome of one `ingest` call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestResult {
    pub entries_added: usize,
    pub entries_kept: usize,
    /// Evicted by this call: budget pruning plus window cap.
    pub entries_evicted: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub budget_utilization: f64,
    pub cache_hit_rate: f64,
    pub full_recompute: bool,
    pub duration: Duration,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineStats {
    pub total_ingested: u64,
    pub total_evicted: u64,
    pub current_entries: usize,
    pub current_tokens: usize,
    pub budget_utilization: f64,
    pub token_budget: usize,
    pub window_size: usize,
    pub optimizer: OptimizerStats,
}

pub struct ContextPipeline {
    config: RealtimeConfig,
    scorer: EngramScorer,
    classifier: ConfidenceClassifier,
    optimizer: IncrementalOptimizer,
    parser: Box<dyn EntryParser>,
    metrics: Arc<dyn MetricsSink>,
    store: Option<Box<dyn EntryStore>>,
    /// Chronological.
    entries: Vec<Entry>,
    total_ingested: u64,
    total_evicted: u64,
    current_tokens: usize,
    budget_utilization: f64,
}

impl ContextPipeline {
    /// Build from a validated configuration, with the paragraph parser and
    /// no metrics or storage.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let detector = CriticalEventDetector::from_config(&config.btsp);
        Ok(Self {
            config: config.realtime.clone(),
            scorer: EngramScorer::new(config.decay.clone()),
            classifier: ConfidenceClassifier::new(&config.states)?,
            optimizer: IncrementalOptimizer::new(config.realtime.full_reoptimize_interval),
            parser: Box::new(ParagraphParser::new(detector, config.decay.default_ttl_secs)),
            metrics: Arc::new(NoopMetrics),
            store: None,
            entries: Vec::new(),
            total_ingested: 0,
            total_evicted: 0,
            current_tokens: 0,
            budget_utilization: 0.0,
        })
    }

    pub fn with_parser(mut self, parser: Box<dyn EntryParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_store(mut self, store: Box<dyn EntryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Parse `raw`, attach `metadata` to every entry and optimize.
    pub fn ingest(
        &mut self,
        raw: &str,
        metadata: &BTreeMap<String, serde_json::Value>,
    ) -> IngestResult {
        self.ingest_at(raw, metadata, now_unix_millis())
    }

    /// [`Self::ingest`] at an explicit time (Unix ms).
    pub fn ingest_at(
        &mut self,
        raw: &str,
        metadata: &BTreeMap<String, serde_json::Value>,
        now: u64,
    ) -> IngestResult {
        let batch: Vec<Entry> = self
            .parser
            .parse(raw, now)
            .into_iter()
            .map(|e| e.with_metadata(metadata))
            .collect();
        self.ingest_entries(batch, now)
    }

    /// Optimize an already-parsed batch.
    pub fn ingest_entries(&mut self, batch: Vec<Entry>, now: u64) -> IngestResult {
        let start = Instant::now();
        let entries_added = batch.len();
        let batch: Vec<Entry> = batch
            .iter()
            .map(|e| self.classifier.classify_entry(&self.scorer.apply(e, now)))
            .collect();
        let batch_ids: HashSet<uuid::Uuid> = batch.iter().map(|e| e.id).collect();

        let outcome = self
            .optimizer
            .optimize_incremental(batch, self.config.token_budget, now);
        let mut evicted = outcome.result.removed.len();

        let mut kept = outcome.result.kept;
        if kept.len() > self.config.window_size {
            let dropped = self.apply_window(&mut kept);
            evicted += self.optimizer.evict(&dropped);
        }

        kept.sort_by(chronological);
        self.entries = kept;
        self.total_ingested += entries_added as u64;
        self.total_evicted += evicted as u64;
        self.current_tokens = self.entries.iter().map(Entry::tokens).sum();
        self.budget_utilization = utilization(self.current_tokens, self.config.token_budget);

        let duration = start.elapsed();
        self.persist(&batch_ids, outcome.result.tokens_before, evicted, now, duration);
        self.metrics.record(&OptimizationMetrics {
            timestamp: now,
            duration,
            tokens_before: outcome.result.tokens_before,
            tokens_after: self.current_tokens,
            entries_processed: entries_added,
            entries_kept: self.entries.len(),
            cache_hit_rate: outcome.cache_hit_rate,
            memory_bytes: self.optimizer.stats().memory_bytes,
        });

        debug!(
            added = entries_added,
            kept = self.entries.len(),
            evicted,
            tokens = self.current_tokens,
            "ingest"
        );

        IngestResult {
            entries_added,
            entries_kept: self.entries.len(),
            entries_evicted: evicted,
            tokens_before: outcome.result.tokens_before,
            tokens_after: self.current_tokens,
            budget_utilization: self.budget_utilization,
            cache_hit_rate: outcome.cache_hit_rate,
            full_recompute: outcome.full_recompute,
            duration,
        }
    }

    /// Keep the top `window_size` entries by hybrid score; returns the rest.
    /// `kept` already carries scores decayed at ingest time.
    fn apply_window(&self, kept: &mut Vec<Entry>) -> Vec<Entry> {
        let oldest = kept.iter().map(|e| e.timestamp).min().unwrap_or(0);
        let newest = kept.iter().map(|e| e.timestamp).max().unwrap_or(0);
        let span = newest.saturating_sub(oldest);

        let mut ranked: Vec<(f64, Entry)> = kept
            .drain(..)
            .map(|e| {
                let score = if e.critical {
                    WINDOW_CRITICAL_SCORE
                } else {
                    let age_norm = if span == 0 {
                        1.0
                    } else {
                        (e.timestamp - oldest) as f64 / span as f64
                    };
                    age_norm * WINDOW_AGE_WEIGHT
                        + e.score * WINDOW_RELEVANCE_WEIGHT
                };
                (score, e)
            })
            .collect();

        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.hash.cmp(&b.hash))
        });

        let dropped = ranked
            .split_off(self.config.window_size)
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        kept.extend(ranked.into_iter().map(|(_, e)| e));
        dropped
    }

    fn persist(
        &self,
        batch_ids: &HashSet<uuid::Uuid>,
        tokens_before: usize,
        evicted: usize,
        now: u64,
        duration: Duration,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        for entry in self.entries.iter().filter(|e| batch_ids.contains(&e.id)) {
            if let Err(e) = store.put(entry) {
                warn!(entry = %entry.id, error = %e, "failed to persist entry");
            }
        }
        let record = OptimizationRecord {
            timestamp: now,
            tokens_before,
            tokens_after: self.current_tokens,
            entries_pruned: evicted,
            duration,
        };
        if let Err(e) = store.record_optimization(&record) {
            warn!(error = %e, "failed to record optimization");
        }
    }

    /// Current entries joined in chronological order.
    pub fn context(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Current entries, oldest first.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            total_ingested: self.total_ingested,
            total_evicted: self.total_evicted,
            current_entries: self.entries.len(),
            current_tokens: self.current_tokens,
            budget_utilization: self.budget_utilization,
            token_budget: self.config.token_budget,
            window_size: self.config.window_size,
            optimizer: self.optimizer.stats(),
        }
    }

    /// Drop all entries, counters and optimizer state.
    pub fn clear(&mut self) {
        self.optimizer.reset();
        self.entries.clear();
        self.total_ingested = 0;
        self.total_evicted = 0;
        self.current_tokens = 0;
        self.budget_utilization = 0.0;
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            version: SNAPSHOT_VERSION,
            optimizer: self.optimizer.snapshot(),
            total_ingested: self.total_ingested,
            total_evicted: self.total_evicted,
        }
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        snapshot::export_json(&self.snapshot())
    }

    /// Apply a snapshot. On error nothing is changed.
    pub fn restore(&mut self, snapshot: PipelineSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        self.optimizer.restore(snapshot.optimizer)?;
        let mut entries = self.optimizer.entries();
        entries.sort_by(chronological);
        self.entries = entries;
        self.total_ingested = snapshot.total_ingested;
        self.total_evicted = snapshot.total_evicted;
        self.current_tokens = self.entries.iter().map(Entry::tokens).sum();
        self.budget_utilization = utilization(self.current_tokens, self.config.token_budget);
        Ok(())
    }

    /// Restore from JSON. A snapshot that fails to decode or validate
    /// leaves the pipeline cold (empty), never partially applied.
    pub fn restore_json(&mut self, json: &str) -> Result<(), SnapshotError> {
        let result = snapshot::import_json(json).and_then(|snap| self.restore(snap));
        if let Err(e) = &result {
            warn!(error = %e, "rejecting snapshot, starting cold");
            self.clear();
        }
        result
    }
}

fn chronological(a: &Entry, b: &Entry) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.hash.cmp(&b.hash))
        .then_with(|| a.id.cmp(&b.id))
}

fn utilization(tokens: usize, budget: usize) -> f64 {
    if budget > 0 {
        tokens as f64 / budget as f64
    } else if tokens == 0 {
        0.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_TTL_SECS;
    use crate::metrics::MetricsCollector;
    use crate::storage::StorageError;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    const NOW: u64 = 1_000_000_000;

    fn config(budget: usize, window: usize) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.realtime.token_budget = budget;
        cfg.realtime.window_size = window;
        cfg
    }

    fn no_meta() -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }

    fn is_chronological(entries: &[Entry]) -> bool {
        entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<String>>,
        records: Mutex<Vec<OptimizationRecord>>,
    }

    impl EntryStore for Arc<RecordingStore> {
        fn put(&self, entry: &Entry) -> Result<(), StorageError> {
            self.puts.lock().unwrap().push(entry.content.clone());
            Ok(())
        }

        fn record_optimization(&self, record: &OptimizationRecord) -> Result<(), StorageError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingStore;

    impl EntryStore for FailingStore {
        fn put(&self, _entry: &Entry) -> Result<(), StorageError> {
            Err("disk full".into())
        }

        fn record_optimization(&self, _record: &OptimizationRecord) -> Result<(), StorageError> {
            Err("disk full".into())
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ContextPipeline::new(&config(100, 0)).is_err());
    }

    #[test]
    fn test_ingest_and_read_back() {
        let mut p = ContextPipeline::new(&config(10_000, 100)).unwrap();
        let r = p.ingest_at("first note\n\nsecond note", &no_meta(), NOW);
        assert_eq!(r.entries_added, 2);
        assert_eq!(r.entries_kept, 2);
        assert_eq!(p.context(), "first note\n\nsecond note");
        assert_eq!(p.stats().total_ingested, 2);
    }

    #[test]
    fn test_metadata_attached() {
        let mut p = ContextPipeline::new(&config(10_000, 100)).unwrap();
        let mut meta = BTreeMap::new();
        meta.insert("session".to_string(), serde_json::json!("abc"));
        p.ingest_at("note", &meta, NOW);
        assert_eq!(p.entries()[0].metadata["session"], serde_json::json!("abc"));
    }

    #[test]
    fn test_empty_ingest() {
        let mut p = ContextPipeline::new(&config(100, 10)).unwrap();
        let r = p.ingest_at("", &no_meta(), NOW);
        assert_eq!(r.entries_kept, 0);
        assert_eq!(r.budget_utilization, 0.0);
        assert_eq!(p.context(), "");
    }

    #[test]
    fn test_window_cap_keeps_newest_and_critical() {
        let mut p = ContextPipeline::new(&config(100_000, 3)).unwrap();
        let batch: Vec<Entry> = (0..6)
            .map(|i| Entry::new(format!("note number {i}"), NOW - 1_000 * (6 - i)))
            .chain(std::iter::once(
                Entry::new("old panic in worker", NOW - 100_000).with_critical(true),
            ))
            .collect();
        let r = p.ingest_entries(batch, NOW);
        assert_eq!(r.entries_kept, 3);
        assert_eq!(r.entries_evicted, 4);

        let contents: Vec<&str> = p.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["old panic in worker", "note number 4", "note number 5"]
        );
        assert!(is_chronological(p.entries()));
        assert_eq!(p.stats().optimizer.cached_entries, 3);
    }

    #[test]
    fn test_window_relevance_uses_ingest_score() {
        // 0.3 TTL old: decayed once to exp(-0.3) = 0.7408, hybrid 0.4445.
        let age_ms = DEFAULT_TTL_SECS * 1000 * 3 / 10;
        let older = Entry::new("alpha older note", NOW - age_ms).with_score(1.0);
        let newest = Entry::new("beta newest note", NOW).with_score(0.0);

        let mut p = ContextPipeline::new(&config(100_000, 1)).unwrap();
        let r = p.ingest_entries(vec![older, newest], NOW);
        assert_eq!(r.entries_kept, 1);

        let contents: Vec<&str> = p.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["alpha older note"]);
        assert_relative_eq!(p.entries()[0].score, (-0.3f64).exp(), epsilon = 1e-9);
    }

    #[test]
    fn test_output_always_chronological() {
        let mut p = ContextPipeline::new(&config(60, 8)).unwrap();
        for round in 0..10u64 {
            let text = (0..5)
                .map(|i| format!("round {round} item {i} payload text"))
                .collect::<Vec<_>>()
                .join("\n\n");
            p.ingest_at(&text, &no_meta(), NOW + round * 10_000);
            assert!(is_chronological(p.entries()));
            assert!(p.entries().len() <= 8);
        }
        let stats = p.stats();
        assert_eq!(stats.total_ingested, 50);
        assert_eq!(stats.total_ingested - stats.total_evicted, stats.current_entries as u64);
    }

    #[test]
    fn test_budget_respected_on_large_batch() {
        let mut p = ContextPipeline::new(&config(40_000, 10_000)).unwrap();
        let words = (0..100)
            .map(|i| format!("w{}", i % 10))
            .collect::<Vec<_>>()
            .join(" ");
        let text = (0..1000)
            .map(|i| format!("{words} doc{i}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let r = p.ingest_at(&text, &no_meta(), NOW);
        assert!(r.tokens_before > 100_000);
        assert!(r.tokens_after <= 40_000);
        assert!(r.budget_utilization <= 1.0);
    }

    #[test]
    fn test_store_receives_kept_entries_and_record() {
        let store = Arc::new(RecordingStore::default());
        let mut p = ContextPipeline::new(&config(10_000, 100))
            .unwrap()
            .with_store(Box::new(store.clone()));
        p.ingest_at("alpha\n\nbeta", &no_meta(), NOW);
        assert_eq!(store.puts.lock().unwrap().len(), 2);
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_store_does_not_fail_ingest() {
        let mut p = ContextPipeline::new(&config(10_000, 100))
            .unwrap()
            .with_store(Box::new(FailingStore));
        let r = p.ingest_at("alpha", &no_meta(), NOW);
        assert_eq!(r.entries_kept, 1);
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = Arc::new(MetricsCollector::new(10));
        let mut p = ContextPipeline::new(&config(10_000, 100))
            .unwrap()
            .with_metrics(metrics.clone());
        p.ingest_at("alpha", &no_meta(), NOW);
        p.ingest_at("alpha", &no_meta(), NOW + 1);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.summary().avg_cache_hit_rate, 0.5);
    }

    #[test]
    fn test_snapshot_warm_restart() {
        let mut p = ContextPipeline::new(&config(10_000, 100)).unwrap();
        p.ingest_at("alpha beta\n\ngamma delta", &no_meta(), NOW);
        let json = p.export_json().unwrap();

        let mut warm = ContextPipeline::new(&config(10_000, 100)).unwrap();
        warm.restore_json(&json).unwrap();
        assert_eq!(warm.context(), p.context());
        assert_eq!(warm.stats().total_ingested, 2);
        assert_eq!(warm.export_json().unwrap(), json);

        let r = warm.ingest_at("alpha beta", &no_meta(), NOW + 5);
        assert_eq!(r.cache_hit_rate, 1.0);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_cold() {
        let mut p = ContextPipeline::new(&config(10_000, 100)).unwrap();
        p.ingest_at("existing", &no_meta(), NOW);
        assert!(p.restore_json("{\"version\": 1, \"optimizer\": 7}").is_err());
        assert!(p.entries().is_empty());
        assert_eq!(p.stats().total_ingested, 0);
    }

    #[test]
    fn test_clear() {
        let mut p = ContextPipeline::new(&config(10_000, 100)).unwrap();
        p.ingest_at("one\n\ntwo", &no_meta(), NOW);
        p.clear();
        assert!(p.entries().is_empty());
        assert_eq!(p.stats().optimizer.cached_entries, 0);
        assert_eq!(p.stats().total_ingested, 0);
    }
}
