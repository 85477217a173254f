//! Offline consolidation ("sleep compression").
//!
//! Not part of the streaming path. Three passes over a batch:
//! 1. purge entries whose decay has reached the threshold (critical
//!    entries are exempt);
//! 2. group duplicates: exact fingerprint matches first, then near
//!    duplicates by cosine similarity of term-frequency vectors;
//! 3. merge each group into its best-scored member.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::DUPLICATE_SIMILARITY;
use crate::engram::EngramScorer;
use crate::entry::Entry;
use crate::tfidf::cosine_of_counts;
use crate::tokenizer::{term_counts, tokenize};

#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsolidateResult {
    /// Survivors, in the order their first group member appeared.
    pub kept: Vec<Entry>,
    /// Ids of every entry that was purged or merged away.
    pub removed: Vec<Uuid>,
    pub entries_before: usize,
    pub entries_after: usize,
    pub decayed_removed: usize,
    pub duplicates_removed: usize,
    /// `entries_after / entries_before`; 1.0 for an empty batch.
    pub compression_ratio: f64,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub struct SleepCompressor {
    scorer: EngramScorer,
    similarity_threshold: f64,
}

impl Default for SleepCompressor {
    fn default() -> Self {
        Self::new(EngramScorer::default(), DUPLICATE_SIMILARITY)
    }
}

impl SleepCompressor {
    pub fn new(scorer: EngramScorer, similarity_threshold: f64) -> Self {
        Self {
            scorer,
            similarity_threshold,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            EngramScorer::new(config.decay.clone()),
            config.consolidation.similarity_threshold,
        )
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn consolidate(&self, entries: &[Entry], now: u64) -> ConsolidateResult {
        let start = Instant::now();
        let entries_before = entries.len();
        let mut removed = Vec::new();

        // Pass 1: decay purge.
        let mut live: Vec<&Entry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.scorer.is_decayed(entry, now) {
                removed.push(entry.id);
            } else {
                live.push(entry);
            }
        }
        let decayed_removed = removed.len();

        // Pass 2: grouping.
        let groups = self.group_duplicates(&live);

        // Pass 3: merge.
        let mut kept = Vec::with_capacity(groups.len());
        let mut duplicates_removed = 0;
        for group in groups {
            let members: Vec<&Entry> = group.iter().map(|&i| live[i]).collect();
            let merged = merge(&members);
            for member in &members {
                if member.id != merged.id {
                    removed.push(member.id);
                }
            }
            duplicates_removed += members.len() - 1;
            kept.push(merged);
        }

        let entries_after = kept.len();
        let compression_ratio = if entries_before == 0 {
            1.0
        } else {
            entries_after as f64 / entries_before as f64
        };

        debug!(
            before = entries_before,
            after = entries_after,
            decayed_removed,
            duplicates_removed,
            "consolidation"
        );

        ConsolidateResult {
            kept,
            removed,
            entries_before,
            entries_after,
            decayed_removed,
            duplicates_removed,
            compression_ratio,
            duration: start.elapsed(),
        }
    }

    /// Indices into `live`, grouped. Every index lands in exactly one
    /// group; groups are ordered by their first member.
    fn group_duplicates(&self, live: &[&Entry]) -> Vec<Vec<usize>> {
        let mut by_hash: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, entry) in live.iter().enumerate() {
            match by_hash.get(entry.hash.as_str()) {
                Some(&g) => groups[g].push(i),
                None => {
                    by_hash.insert(entry.hash.as_str(), groups.len());
                    groups.push(vec![i]);
                }
            }
        }

        // Near duplicates among the singletons; first match wins.
        let singles: Vec<usize> = (0..groups.len()).filter(|&g| groups[g].len() == 1).collect();
        let counts: Vec<BTreeMap<String, usize>> = singles
            .iter()
            .map(|&g| term_counts(&tokenize(&live[groups[g][0]].content)))
            .collect();
        let mut absorbed = vec![false; singles.len()];
        for a in 0..singles.len() {
            if absorbed[a] {
                continue;
            }
            for b in (a + 1)..singles.len() {
                if absorbed[b] {
                    continue;
                }
                if cosine_of_counts(&counts[a], &counts[b]) >= self.similarity_threshold {
                    let member = groups[singles[b]][0];
                    groups[singles[a]].push(member);
                    absorbed[a] = true;
                    absorbed[b] = true;
                    break;
                }
            }
        }

        let dropped: Vec<usize> = singles
            .iter()
            .zip(&absorbed)
            .filter(|&(&g, &paired)| paired && groups[g].len() == 1)
            .map(|(&g, _)| g)
            .collect();
        groups
            .into_iter()
            .enumerate()
            .filter(|(g, _)| !dropped.contains(g))
            .map(|(_, members)| members)
            .collect()
    }
}

/// Best-scored member (newest on ties) carrying the group's summed access
/// count and the union of its tags. Critical if any member is.
fn merge(members: &[&Entry]) -> Entry {
    let best = members
        .iter()
        .copied()
        .max_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        })
        .unwrap_or(members[0]);
    if members.len() == 1 {
        return best.clone();
    }

    let access = members
        .iter()
        .fold(0u32, |acc, m| acc.saturating_add(m.access_count));
    let critical = members.iter().any(|m| m.critical);
    best.clone()
        .with_access_count(access)
        .with_tags(members.iter().flat_map(|m| m.tags.iter().cloned()))
        .with_critical(critical)
}
