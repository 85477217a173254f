//! Versioned JSON snapshot of optimizer and pipeline state.
//!
//! Maps are serialized sorted and the cache in fingerprint order, so
//! export → import → export reproduces the same bytes. Field names are
//! camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::incremental::CachedScore;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerSnapshot {
    pub version: u32,
    pub cache: Vec<CachedScore>,
    pub doc_freq: BTreeMap<String, usize>,
    pub total_documents: usize,
    pub update_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub version: u32,
    pub optimizer: OptimizerSnapshot,
    pub total_ingested: u64,
    pub total_evicted: u64,
}

/// Serialize a pipeline snapshot to JSON.
pub fn export_json(snapshot: &PipelineSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(snapshot)
}

/// Parse a pipeline snapshot. Only decodes and checks the version; the
/// optimizer validates contents when the snapshot is applied.
pub fn import_json(json: &str) -> Result<PipelineSnapshot, SnapshotError> {
    let snapshot: PipelineSnapshot = serde_json::from_str(json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Version {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot)
}
