//! Storage collaborator boundary.
//!
//! The engine only writes: kept entries and one telemetry record per
//! optimization. It never reads back mid-computation, and a failing store
//! never fails an optimization.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;

pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

/// Telemetry row for one optimization call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    /// Unix ms.
    pub timestamp: u64,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub entries_pruned: usize,
    pub duration: Duration,
}

pub trait EntryStore: Send {
    fn put(&self, entry: &Entry) -> Result<(), StorageError>;

    fn record_optimization(&self, record: &OptimizationRecord) -> Result<(), StorageError>;
}
