use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    // Checkpoint every ~400KB instead of the default ~4MB
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Non-fatal: in-memory DBs and fresh files legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            id           TEXT PRIMARY KEY,
            content      TEXT NOT NULL,
            hash         TEXT NOT NULL,
            timestamp    INTEGER NOT NULL,
            score        REAL NOT NULL,
            ttl_secs     INTEGER NOT NULL,
            state        TEXT NOT NULL DEFAULT 'silent',
            access_count INTEGER NOT NULL DEFAULT 0,
            tags         TEXT NOT NULL DEFAULT '[]',
            metadata     TEXT NOT NULL DEFAULT '{}',
            critical     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS optimizations (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp      INTEGER NOT NULL,
            tokens_before  INTEGER NOT NULL,
            tokens_after   INTEGER NOT NULL,
            entries_pruned INTEGER NOT NULL,
            duration_us    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(hash);
        CREATE INDEX IF NOT EXISTS idx_entries_timestamp ON entries(timestamp);
        CREATE INDEX IF NOT EXISTS idx_opt_timestamp ON optimizations(timestamp);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &["entries", "optimizations", "metadata"] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert!(count >= 0, "table {table} should exist");
        }
    }

    #[test]
    fn test_schema_version_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_wal_mode_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        // In-memory always reports "memory", on-disk would report "wal"
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert!(mode == "memory" || mode == "wal", "got mode: {mode}");
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }

    #[test]
    fn test_busy_timeout_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }
}
