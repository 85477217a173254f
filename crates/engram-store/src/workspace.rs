use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::MutexGuard;

use engram_core::EngineConfig;

use crate::config::{CONFIG_FILE, load_config};
use crate::error::{Result, StoreError};
use crate::store::{SharedStore, Store};

pub const DB_FILE: &str = "engram.db";

/// Default data directory: `~/.engram`.
pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".engram")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// A data directory: `engram.toml` plus `engram.db`.
pub struct Workspace {
    dir: PathBuf,
    config: EngineConfig,
    store: SharedStore,
}

impl Workspace {
    pub fn open(base_dir: Option<&Path>) -> Result<Self> {
        let dir = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::InvalidData(format!("failed to create {}: {e}", dir.display()))
        })?;

        let config = load_config(&dir.join(CONFIG_FILE))?;
        let store = Store::open(&dir.join(DB_FILE))?;
        tracing::debug!(dir = %dir.display(), "opened workspace");

        Ok(Self {
            dir,
            config,
            store: SharedStore::new(store),
        })
    }

    /// In-memory store and default config (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            dir: PathBuf::from(":memory:"),
            config: EngineConfig::default(),
            store: SharedStore::new(Store::open_in_memory()?),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock()
    }

    /// Handle for plugging the store into a pipeline.
    pub fn shared_store(&self) -> SharedStore {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::Entry;

    #[test]
    fn test_open_creates_dir_and_db() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("data");
        let ws = Workspace::open(Some(&dir)).unwrap();
        assert!(dir.join(DB_FILE).exists());
        assert_eq!(ws.dir(), dir.as_path());
        assert_eq!(ws.config(), &EngineConfig::default());
    }

    #[test]
    fn test_open_reads_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[realtime]\nwindow_size = 7\n").unwrap();
        let ws = Workspace::open(Some(tmp.path())).unwrap();
        assert_eq!(ws.config().realtime.window_size, 7);
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[realtime]\nwindow_size = 0\n").unwrap();
        assert!(Workspace::open(Some(tmp.path())).is_err());
    }

    #[test]
    fn test_shared_store_sees_same_data() {
        let ws = Workspace::open_in_memory().unwrap();
        let shared = ws.shared_store();
        shared.lock().put_entry(&Entry::new("x", 1)).unwrap();
        assert_eq!(ws.store().entry_count().unwrap(), 1);
    }
}
