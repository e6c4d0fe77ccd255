use rusqlite::Connection;
use watchrelay_core::error::{Result, WatchRelayError};

/// Name of the append-only log table.
pub const LOG_TABLE: &str = "watchrelay";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS watchrelay (
        revision INTEGER PRIMARY KEY,
        create_revision INTEGER NOT NULL DEFAULT 0,
        prev_revision INTEGER NOT NULL DEFAULT 0,
        resource_name TEXT NOT NULL,
        created INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        value BLOB,
        created_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS watchrelay_resource_name_index
        ON watchrelay (resource_name)",
    "CREATE INDEX IF NOT EXISTS watchrelay_resource_name_revision_index
        ON watchrelay (resource_name, revision)",
    "CREATE INDEX IF NOT EXISTS watchrelay_revision_deleted_index
        ON watchrelay (revision, deleted)",
];

/// Create the log table and its indexes if absent.
pub fn init(conn: &Connection) -> Result<()> {
    for stmt in SCHEMA {
        conn.execute(stmt, [])
            .map_err(|e| WatchRelayError::Database(e.to_string()))?;
    }
    Ok(())
}

/// Apply the connection pragmas the log relies on.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| WatchRelayError::Database(e.to_string()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| WatchRelayError::Database(e.to_string()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| WatchRelayError::Database(e.to_string()))?;
    Ok(())
}
