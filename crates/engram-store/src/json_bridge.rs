use std::fs;
use std::path::Path;

use engram_core::constants::DEFAULT_FULL_REOPTIMIZE_INTERVAL;
use engram_core::{
    IncrementalOptimizer, PipelineSnapshot, SNAPSHOT_VERSION, export_json, import_json,
};

use crate::error::{Result, StoreError};
use crate::store::{SNAPSHOT_KEY, Store, put_entry_on, set_metadata_on};

impl Store {
    /// Validate a snapshot JSON file and make it the stored state.
    pub fn import_snapshot_file(&self, path: &Path) -> Result<PipelineSnapshot> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        self.import_snapshot_str(&json)
    }

    /// Validate a snapshot and make it the stored state: the snapshot slot
    /// and the entry table are replaced together, or not at all.
    pub fn import_snapshot_str(&self, json: &str) -> Result<PipelineSnapshot> {
        let snapshot = import_json(json)?;
        let mut probe = IncrementalOptimizer::new(DEFAULT_FULL_REOPTIMIZE_INTERVAL);
        probe.restore(snapshot.optimizer.clone())?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute_batch("DELETE FROM entries;")?;
        for entry in probe.entries() {
            put_entry_on(&tx, &entry)?;
        }
        set_metadata_on(&tx, SNAPSHOT_KEY, json)?;
        tx.commit()?;

        tracing::info!(
            entries = snapshot.optimizer.cache.len(),
            "imported snapshot"
        );
        Ok(snapshot)
    }

    /// Write the stored snapshot to `path`; a cold snapshot if none exists.
    pub fn export_snapshot_file(&self, path: &Path) -> Result<()> {
        let json = self.export_snapshot_string()?;
        fs::write(path, json).map_err(|e| {
            StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
        })
    }

    pub fn export_snapshot_string(&self) -> Result<String> {
        if let Some(json) = self.load_snapshot()? {
            return Ok(json);
        }
        let cold = PipelineSnapshot {
            version: SNAPSHOT_VERSION,
            optimizer: IncrementalOptimizer::new(DEFAULT_FULL_REOPTIMIZE_INTERVAL).snapshot(),
            total_ingested: 0,
            total_evicted: 0,
        };
        Ok(export_json(&cold)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{ContextPipeline, EngineConfig};
    use std::collections::BTreeMap;

    const NOW: u64 = 1_700_000_000_000;

    fn pipeline_json() -> (String, Vec<String>) {
        let mut pipeline = ContextPipeline::new(&EngineConfig::default()).unwrap();
        pipeline.ingest_at("first block\n\nsecond block", &BTreeMap::new(), NOW);
        let contents = pipeline.entries().iter().map(|e| e.content.clone()).collect();
        (pipeline.export_json().unwrap(), contents)
    }

    #[test]
    fn test_import_export_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let (json, contents) = pipeline_json();
        let snapshot = store.import_snapshot_str(&json).unwrap();
        assert_eq!(snapshot.total_ingested, 2);
        assert_eq!(store.export_snapshot_string().unwrap(), json);

        let stored: Vec<String> = store
            .list_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(stored, contents);
    }

    #[test]
    fn test_import_rejects_tampered_snapshot() {
        let store = Store::open_in_memory().unwrap();
        let (json, _) = pipeline_json();
        store.import_snapshot_str(&json).unwrap();

        let tampered = json.replace("second block", "other block");
        let err = store.import_snapshot_str(&tampered).unwrap_err();
        assert!(matches!(err, StoreError::Snapshot(_)));
        // Previous state untouched
        assert_eq!(store.load_snapshot().unwrap().as_deref(), Some(json.as_str()));
        assert_eq!(store.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_import_rejects_wrong_version() {
        let store = Store::open_in_memory().unwrap();
        let (json, _) = pipeline_json();
        let bumped = json.replacen("\"version\": 1", "\"version\": 99", 1);
        assert!(store.import_snapshot_str(&bumped).is_err());
        assert_eq!(store.load_snapshot().unwrap(), None);
    }

    #[test]
    fn test_export_cold_snapshot() {
        let store = Store::open_in_memory().unwrap();
        let json = store.export_snapshot_string().unwrap();
        let snapshot = import_json(&json).unwrap();
        assert!(snapshot.optimizer.cache.is_empty());
        assert_eq!(snapshot.total_ingested, 0);
    }

    #[test]
    fn test_import_export_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let (json, _) = pipeline_json();
        fs::write(&path, &json).unwrap();

        let store = Store::open_in_memory().unwrap();
        store.import_snapshot_file(&path).unwrap();

        let out = dir.path().join("out.json");
        store.export_snapshot_file(&out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), json);
    }

    #[test]
    fn test_import_missing_file() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .import_snapshot_file(Path::new("/nonexistent/snapshot.json"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }
}
