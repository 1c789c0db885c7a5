use rusqlite::Connection;

use crate::error::{Result, SyncError};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| SyncError::DbCorruption(format!("failed to get schema version: {}", e)))?;

    log::info!(
        "sync database schema version: {}, target: {}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| SyncError::DbCorruption(format!("failed to update schema version: {}", e)))?;

    Ok(())
}

/// Migration v1: per-object sync state, change-log token, and an operations
/// history log.
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("running migration v1: sync core schema");

    conn.execute_batch(
        r#"
        -- One row per item the prior sync recorded (the "DB view" of a triplet).
        CREATE TABLE IF NOT EXISTS sync_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            local_relative_path TEXT NOT NULL UNIQUE,
            remote_id TEXT,
            remote_relative_path TEXT,
            checksum TEXT,
            mtime_ms INTEGER NOT NULL,
            kind TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sync_items_remote_id ON sync_items(remote_id);

        -- Single-row table holding the change-log cursor.
        CREATE TABLE IF NOT EXISTS sync_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            change_log_token TEXT,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Append-only operations history, mirroring every Record* call.
        CREATE TABLE IF NOT EXISTS sync_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            operation TEXT NOT NULL,
            local_relative_path TEXT NOT NULL,
            dest_relative_path TEXT,
            remote_id TEXT,
            size INTEGER,
            status TEXT NOT NULL DEFAULT 'completed',
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_ops_timestamp ON sync_operations(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_sync_ops_path ON sync_operations(local_relative_path);
        "#,
    )
    .map_err(|e| SyncError::DbCorruption(format!("failed to run migration v1: {}", e)))?;

    log::info!("migration v1 completed successfully");
    Ok(())
}
