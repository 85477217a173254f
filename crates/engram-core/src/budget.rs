//! Budget pruner: greedy selection of entries under a token budget.
//!
//! Priority is `relevance × (1 − decay) × state multiplier`. Critical
//! entries are admitted first, then regular entries by descending priority
//! (newest first on ties). The first critical entry is admitted even when
//! it alone exceeds the budget, so a critical event is never dropped into
//! total silence; it is the only entry allowed past the budget.

use std::cmp::Ordering;

use tracing::debug;

use crate::confidence::state_multiplier;
use crate::config::PruningConfig;
use crate::engram::entry_decay;
use crate::entry::Entry;
use crate::tfidf::RelevanceIndex;

/// Priority of `entry` against `index` at `now`.
pub fn priority(entry: &Entry, index: &RelevanceIndex, now: u64) -> f64 {
    let relevance = index.score(entry);
    let freshness = 1.0 - entry_decay(entry, now);
    (relevance * freshness * state_multiplier(entry.state, entry.critical)).max(0.0)
}

/// An entry with a precomputed priority.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub entry: Entry,
    pub priority: f64,
}

impl Candidate {
    pub fn new(entry: Entry, priority: f64) -> Self {
        Self { entry, priority }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PruneResult {
    /// Admitted entries, in admission order.
    pub kept: Vec<Entry>,
    /// Rejected entries, in rank order.
    pub removed: Vec<Entry>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// `tokens_after / budget`. A zero budget reports 0.0 when nothing is
    /// kept and 1.0 otherwise.
    pub budget_utilization: f64,
}

impl PruneResult {
    pub fn entries_pruned(&self) -> usize {
        self.removed.len()
    }
}

/// Rank order: priority desc, then newest, then content hash and id so the
/// order is total and re-runs partition identically.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
        .then_with(|| a.entry.hash.cmp(&b.entry.hash))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

#[derive(Clone, Debug)]
pub struct BudgetPruner {
    token_budget: usize,
}

impl BudgetPruner {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    pub fn from_config(config: &PruningConfig) -> Self {
        Self::new(config.token_budget)
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Score `entries` against a relevance index built over themselves and
    /// select under the budget.
    pub fn prune(&self, entries: &[Entry], now: u64) -> PruneResult {
        let index = RelevanceIndex::build(entries);
        let candidates = entries
            .iter()
            .map(|e| Candidate::new(e.clone(), priority(e, &index, now)))
            .collect();
        self.select(candidates)
    }

    /// Select from pre-scored candidates.
    pub fn select(&self, candidates: Vec<Candidate>) -> PruneResult {
        let budget = self.token_budget;
        let tokens_before: usize = candidates.iter().map(|c| c.entry.tokens()).sum();

        let (mut critical, mut regular): (Vec<Candidate>, Vec<Candidate>) =
            candidates.into_iter().partition(|c| c.entry.critical);
        critical.sort_by(rank);
        regular.sort_by(rank);

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        let mut used: usize = 0;

        let mut guard_fired = false;
        for (i, c) in critical.into_iter().enumerate() {
            let cost = c.entry.tokens();
            if guard_fired {
                removed.push(c.entry);
            } else if used + cost <= budget {
                used += cost;
                kept.push(c.entry);
            } else if i == 0 {
                used += cost;
                guard_fired = true;
                kept.push(c.entry);
            } else {
                removed.push(c.entry);
            }
        }

        for c in regular {
            let cost = c.entry.tokens();
            if used >= budget || used + cost > budget {
                removed.push(c.entry);
                continue;
            }
            used += cost;
            kept.push(c.entry);
        }

        let budget_utilization = if budget > 0 {
            used as f64 / budget as f64
        } else if kept.is_empty() {
            0.0
        } else {
            1.0
        };

        debug!(
            kept = kept.len(),
            removed = removed.len(),
            tokens_before,
            tokens_after = used,
            budget,
            guard_fired,
            "budget prune"
        );

        PruneResult {
            kept,
            removed,
            tokens_before,
            tokens_after: used,
            budget_utilization,
        }
    }
}
