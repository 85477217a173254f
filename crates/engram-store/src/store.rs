use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use engram_core::{ConfidenceState, Entry, EntryStore, OptimizationRecord, StorageError};

use crate::error::{Result, StoreError};
use crate::schema;

pub(crate) const SNAPSHOT_KEY: &str = "pipeline_snapshot";

const ENTRY_COLUMNS: &str =
    "id, content, hash, timestamp, score, ttl_secs, state, access_count, tags, metadata, critical";

/// Aggregate over the `optimizations` table.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OptimizationStats {
    pub runs: usize,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub entries_pruned: u64,
    pub avg_duration: Duration,
    pub last_run: Option<u64>,
}

impl OptimizationStats {
    pub fn tokens_saved(&self) -> u64 {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        set_metadata_on(&self.conn, key, value)
    }

    // --- Entries ---

    /// Insert or overwrite by id.
    pub fn put_entry(&self, entry: &Entry) -> Result<()> {
        put_entry_on(&self.conn, entry)
    }

    /// All entries, oldest first.
    pub fn list_entries(&self) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY timestamp, rowid"
        ))?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(entry_from_row(row)?);
        }
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Atomically make `entries` the full stored set.
    pub fn replace_entries(&self, entries: &[Entry]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch("DELETE FROM entries;")?;
        for entry in entries {
            put_entry_on(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Telemetry ---

    pub fn record_optimization(&self, record: &OptimizationRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO optimizations (timestamp, tokens_before, tokens_after, entries_pruned, duration_us)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.timestamp as i64,
                record.tokens_before as i64,
                record.tokens_after as i64,
                record.entries_pruned as i64,
                record.duration.as_micros().min(i64::MAX as u128) as i64,
            ],
        )?;
        Ok(())
    }

    /// Most recent first.
    pub fn recent_optimizations(&self, limit: usize) -> Result<Vec<OptimizationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, tokens_before, tokens_after, entries_pruned, duration_us
             FROM optimizations ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], |row| {
                Ok(OptimizationRecord {
                    timestamp: row.get::<_, i64>(0)? as u64,
                    tokens_before: row.get::<_, i64>(1)? as usize,
                    tokens_after: row.get::<_, i64>(2)? as usize,
                    entries_pruned: row.get::<_, i64>(3)? as usize,
                    duration: Duration::from_micros(row.get::<_, i64>(4)? as u64),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(records)
    }

    pub fn optimization_stats(&self) -> Result<OptimizationStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(tokens_before), 0), COALESCE(SUM(tokens_after), 0),
                    COALESCE(SUM(entries_pruned), 0), COALESCE(AVG(duration_us), 0.0),
                    MAX(timestamp)
             FROM optimizations",
            [],
            |row| {
                Ok(OptimizationStats {
                    runs: row.get::<_, i64>(0)? as usize,
                    tokens_before: row.get::<_, i64>(1)? as u64,
                    tokens_after: row.get::<_, i64>(2)? as u64,
                    entries_pruned: row.get::<_, i64>(3)? as u64,
                    avg_duration: Duration::from_micros(row.get::<_, f64>(4)? as u64),
                    last_run: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
                })
            },
        )?;
        Ok(stats)
    }

    // --- Snapshot ---

    pub fn save_snapshot(&self, json: &str) -> Result<()> {
        self.set_metadata(SNAPSHOT_KEY, json)
    }

    pub fn load_snapshot(&self) -> Result<Option<String>> {
        self.get_metadata(SNAPSHOT_KEY)
    }

    pub fn clear_snapshot(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?1", [SNAPSHOT_KEY])?;
        Ok(())
    }

    /// Database size in bytes.
    pub fn db_size(&self) -> u64 {
        let pages: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(0);
        (pages * page_size).max(0) as u64
    }
}

impl EntryStore for Store {
    fn put(&self, entry: &Entry) -> std::result::Result<(), StorageError> {
        Ok(self.put_entry(entry)?)
    }

    fn record_optimization(
        &self,
        record: &OptimizationRecord,
    ) -> std::result::Result<(), StorageError> {
        Ok(Store::record_optimization(self, record)?)
    }
}

/// Cloneable handle for when the pipeline and its caller both need the
/// store.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Store> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EntryStore for SharedStore {
    fn put(&self, entry: &Entry) -> std::result::Result<(), StorageError> {
        self.lock().put(entry)
    }

    fn record_optimization(
        &self,
        record: &OptimizationRecord,
    ) -> std::result::Result<(), StorageError> {
        EntryStore::record_optimization(&*self.lock(), record)
    }
}

pub(crate) fn set_metadata_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn put_entry_on(conn: &Connection, entry: &Entry) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO entries ({ENTRY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            entry.id.to_string(),
            entry.content,
            entry.hash,
            entry.timestamp as i64,
            entry.score,
            entry.ttl_secs as i64,
            entry.state.as_str(),
            entry.access_count,
            serde_json::to_string(&entry.tags)?,
            serde_json::to_string(&entry.metadata)?,
            entry.critical as i32,
        ],
    )?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> Result<Entry> {
    let id: String = row.get(0)?;
    let tags: String = row.get(8)?;
    let metadata: String = row.get(9)?;
    let state: String = row.get(6)?;
    Ok(Entry {
        id: parse_uuid(&id)?,
        content: row.get(1)?,
        hash: row.get(2)?,
        timestamp: row.get::<_, i64>(3)? as u64,
        score: row.get(4)?,
        ttl_secs: row.get::<_, i64>(5)? as u64,
        state: ConfidenceState::from_str_lossy(&state),
        access_count: row.get(7)?,
        tags: serde_json::from_str(&tags)?,
        metadata: serde_json::from_str(&metadata)?,
        critical: row.get::<_, i32>(10)? != 0,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("invalid UUID '{s}': {e}")))
}
