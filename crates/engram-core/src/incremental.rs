//! Incremental optimizer: budget pruning across successive batches without
//! rescoring the whole corpus each time.
//!
//! Priorities are cached per content fingerprint and the document-frequency
//! table is maintained additively. Cached priorities are not revisited when
//! IDF shifts under them, so every `full_reoptimize_interval` calls the
//! whole state is discarded and rebuilt from scratch to bound that drift.
//!
//! Invariant: the cache and the relevance index always describe exactly the
//! retained entry set; anything pruned is removed from both.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::budget::{BudgetPruner, Candidate, PruneResult, priority};
use crate::constants::BTSP_SCORE_FLOOR;
use crate::entry::{ConfidenceState, Entry, content_hash};
use crate::error::SnapshotError;
use crate::snapshot::{OptimizerSnapshot, SNAPSHOT_VERSION};
use crate::tfidf::{RelevanceIndex, unique_terms};

/// Cached priority for one fingerprint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedScore {
    pub entry: Entry,
    pub score: f64,
    /// When the score was computed, Unix ms.
    pub cached_at: u64,
}

/// Result of one optimizer call.
#[derive(Clone, Debug, Default)]
pub struct OptimizeOutcome {
    pub result: PruneResult,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Cached batch entries / batch entries; 0.0 for an empty batch.
    pub cache_hit_rate: f64,
    pub full_recompute: bool,
    pub duration: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OptimizerStats {
    pub cached_entries: usize,
    pub indexed_terms: usize,
    pub total_documents: usize,
    pub update_count: u64,
    pub full_reoptimize_interval: u64,
    /// Rough heap footprint of cache and index.
    pub memory_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct IncrementalOptimizer {
    /// Keyed by content hash; sorted for stable snapshots.
    cache: BTreeMap<String, CachedScore>,
    index: RelevanceIndex,
    update_count: u64,
    full_reoptimize_interval: u64,
}

impl IncrementalOptimizer {
    /// `full_reoptimize_interval` is validated upstream to be at least 1.
    pub fn new(full_reoptimize_interval: u64) -> Self {
        Self {
            cache: BTreeMap::new(),
            index: RelevanceIndex::new(),
            update_count: 0,
            full_reoptimize_interval: full_reoptimize_interval.max(1),
        }
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn index(&self) -> &RelevanceIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn cached_score(&self, hash: &str) -> Option<&CachedScore> {
        self.cache.get(hash)
    }

    /// Retained entries, in fingerprint order.
    pub fn entries(&self) -> Vec<Entry> {
        self.cache.values().map(|c| c.entry.clone()).collect()
    }

    /// Admit a batch and prune the whole retained set to `token_budget`.
    pub fn optimize_incremental(
        &mut self,
        batch: Vec<Entry>,
        token_budget: usize,
        now: u64,
    ) -> OptimizeOutcome {
        if self.update_count >= self.full_reoptimize_interval {
            info!(
                update_count = self.update_count,
                interval = self.full_reoptimize_interval,
                "periodic full reoptimization"
            );
            return self.optimize_full(batch, token_budget, now);
        }

        let start = Instant::now();
        let batch_len = batch.len();
        let mut hits = 0usize;
        let mut pending: Vec<Entry> = Vec::new();
        let mut pending_pos: HashMap<String, usize> = HashMap::new();

        // Pass 1: split hits from misses; grow the index with every miss
        // before any of them is scored.
        for entry in batch {
            if let Some(cached) = self.cache.get_mut(&entry.hash) {
                hits += 1;
                cached.entry = entry;
            } else if let Some(&pos) = pending_pos.get(&entry.hash) {
                hits += 1;
                pending[pos] = entry;
            } else {
                self.index.add_terms(&unique_terms(&entry.content));
                pending_pos.insert(entry.hash.clone(), pending.len());
                pending.push(entry);
            }
        }

        // Pass 2: score misses against the updated corpus.
        let misses = pending.len();
        for entry in pending {
            let score = priority(&entry, &self.index, now);
            self.cache.insert(
                entry.hash.clone(),
                CachedScore {
                    entry,
                    score,
                    cached_at: now,
                },
            );
        }

        self.update_count += 1;
        let result = self.prune_retained(token_budget);
        let cache_hit_rate = if batch_len == 0 {
            0.0
        } else {
            hits as f64 / batch_len as f64
        };

        debug!(
            batch = batch_len,
            hits,
            misses,
            cache_hit_rate,
            retained = self.cache.len(),
            "incremental optimization"
        );

        OptimizeOutcome {
            result,
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate,
            full_recompute: false,
            duration: start.elapsed(),
        }
    }

    /// Discard all incremental state and rescore the union of the retained
    /// set and `batch` from scratch. Always reports zero cache hits.
    pub fn optimize_full(
        &mut self,
        batch: Vec<Entry>,
        token_budget: usize,
        now: u64,
    ) -> OptimizeOutcome {
        let start = Instant::now();

        let mut union: BTreeMap<String, Entry> = std::mem::take(&mut self.cache)
            .into_iter()
            .map(|(hash, cached)| (hash, cached.entry))
            .collect();
        for entry in batch {
            union.insert(entry.hash.clone(), entry);
        }

        self.index = RelevanceIndex::build(union.values());
        for (hash, entry) in union {
            let score = priority(&entry, &self.index, now);
            self.cache.insert(
                hash,
                CachedScore {
                    entry,
                    score,
                    cached_at: now,
                },
            );
        }
        let misses = self.cache.len();

        self.update_count = 0;
        let result = self.prune_retained(token_budget);

        debug!(
            scored = misses,
            retained = self.cache.len(),
            "full optimization"
        );

        OptimizeOutcome {
            result,
            cache_hits: 0,
            cache_misses: misses,
            cache_hit_rate: 0.0,
            full_recompute: true,
            duration: start.elapsed(),
        }
    }

    /// Drop entries from the retained set (cache and index together).
    /// Unknown entries are ignored. Returns how many were removed.
    pub fn evict(&mut self, entries: &[Entry]) -> usize {
        let mut removed = 0;
        for entry in entries {
            if let Some(cached) = self.cache.remove(&entry.hash) {
                self.index.remove_document(&cached.entry.content);
                removed += 1;
            }
        }
        removed
    }

    pub fn reset(&mut self) {
        self.cache.clear();
        self.index.clear();
        self.update_count = 0;
    }

    pub fn stats(&self) -> OptimizerStats {
        let cache_bytes: usize = self
            .cache
            .iter()
            .map(|(hash, c)| {
                hash.len()
                    + c.entry.content.len()
                    + c.entry.hash.len()
                    + c.entry.tags.iter().map(String::len).sum::<usize>()
                    + std::mem::size_of::<CachedScore>()
            })
            .sum();
        let index_bytes: usize = self
            .index
            .doc_freq()
            .keys()
            .map(|term| term.len() + std::mem::size_of::<(String, usize)>())
            .sum();
        OptimizerStats {
            cached_entries: self.cache.len(),
            indexed_terms: self.index.term_count(),
            total_documents: self.index.total_documents(),
            update_count: self.update_count,
            full_reoptimize_interval: self.full_reoptimize_interval,
            memory_bytes: cache_bytes + index_bytes,
        }
    }

    pub fn snapshot(&self) -> OptimizerSnapshot {
        OptimizerSnapshot {
            version: SNAPSHOT_VERSION,
            cache: self.cache.values().cloned().collect(),
            doc_freq: self.index.doc_freq().clone(),
            total_documents: self.index.total_documents(),
            update_count: self.update_count,
        }
    }

    /// Replace all state with `snapshot`. The snapshot is fully validated
    /// first; on error `self` is left untouched.
    pub fn restore(&mut self, snapshot: OptimizerSnapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let mut cache = BTreeMap::new();
        let mut seen = HashSet::new();
        for cached in snapshot.cache {
            if content_hash(&cached.entry.content) != cached.entry.hash {
                return Err(SnapshotError::Inconsistent(format!(
                    "entry {} fingerprint does not match its content",
                    cached.entry.id
                )));
            }
            if !cached.score.is_finite() {
                return Err(SnapshotError::Inconsistent(format!(
                    "entry {} has a non-finite score",
                    cached.entry.id
                )));
            }
            if !(0.0..=1.0).contains(&cached.entry.score) {
                return Err(SnapshotError::Inconsistent(format!(
                    "entry {} score {} is outside [0, 1]",
                    cached.entry.id, cached.entry.score
                )));
            }
            if cached.entry.critical
                && (cached.entry.state != ConfidenceState::Active
                    || cached.entry.score < BTSP_SCORE_FLOOR)
            {
                return Err(SnapshotError::Inconsistent(format!(
                    "critical entry {} must be active with score >= {BTSP_SCORE_FLOOR}",
                    cached.entry.id
                )));
            }
            if !seen.insert(cached.entry.hash.clone()) {
                return Err(SnapshotError::Inconsistent(format!(
                    "duplicate fingerprint {}",
                    cached.entry.hash
                )));
            }
            cache.insert(cached.entry.hash.clone(), cached);
        }

        let expected = RelevanceIndex::build(cache.values().map(|c| &c.entry));
        let restored = RelevanceIndex::from_parts(snapshot.doc_freq, snapshot.total_documents);
        if expected != restored {
            return Err(SnapshotError::Inconsistent(
                "document-frequency table does not match cached entries".to_string(),
            ));
        }

        self.cache = cache;
        self.index = restored;
        self.update_count = snapshot.update_count;
        Ok(())
    }

    /// Run the pruner over everything retained and forget what it rejects.
    fn prune_retained(&mut self, token_budget: usize) -> PruneResult {
        let candidates = self
            .cache
            .values()
            .map(|c| Candidate::new(c.entry.clone(), c.score))
            .collect();
        let result = BudgetPruner::new(token_budget).select(candidates);
        self.evict(&result.removed);
        result
    }
}
