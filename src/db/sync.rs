use rusqlite::{params, OptionalExtension};

use super::DbManager;
use crate::error::{Result, SyncError};
use crate::model::ObjectKind;

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Folder => write!(f, "folder"),
            ObjectKind::Document => write!(f, "document"),
        }
    }
}

impl TryFrom<&str> for ObjectKind {
    type Error = SyncError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "folder" => Ok(ObjectKind::Folder),
            "document" => Ok(ObjectKind::Document),
            other => Err(SyncError::DbCorruption(format!(
                "unknown object kind in database: {}",
                other
            ))),
        }
    }
}

/// One row of `sync_items`: the persisted "DB view" of a triplet.
#[derive(Debug, Clone)]
pub struct SyncItemRow {
    pub local_relative_path: String,
    pub remote_id: Option<String>,
    pub remote_relative_path: Option<String>,
    pub checksum: Option<String>,
    pub mtime_ms: i64,
    pub kind: ObjectKind,
}

impl SyncItemRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get("kind")?;
        Ok(Self {
            local_relative_path: row.get("local_relative_path")?,
            remote_id: row.get("remote_id")?,
            remote_relative_path: row.get("remote_relative_path")?,
            checksum: row.get("checksum")?,
            mtime_ms: row.get("mtime_ms")?,
            kind: ObjectKind::try_from(kind_str.as_str())
                .unwrap_or(ObjectKind::Document),
        })
    }
}

impl DbManager {
    /// `GetChangeLogToken`.
    pub fn get_change_log_token(&self) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT change_log_token FROM sync_state WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map(|opt| opt.flatten())
        .map_err(SyncError::from)
    }

    /// `SetChangeLogToken`. Never regresses the persisted token is enforced by
    /// the caller (the pipeline only calls this after a fully successful run).
    pub fn set_change_log_token(&self, token: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sync_state (id, change_log_token, updated_at)
             VALUES (1, ?1, strftime('%s', 'now'))
             ON CONFLICT(id) DO UPDATE SET
                change_log_token = excluded.change_log_token,
                updated_at = excluded.updated_at",
            params![token],
        )?;
        Ok(())
    }

    /// `GetPathById`. Returns `(localPath, remoteId, kind)`.
    pub fn get_path_by_id(&self, remote_id: &str) -> Result<Option<(String, String, ObjectKind)>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT local_relative_path, remote_id, kind FROM sync_items WHERE remote_id = ?1",
                params![remote_id],
                |row| {
                    let kind_str: String = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        kind_str,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((local_path, id, kind_str)) => {
                let kind = ObjectKind::try_from(kind_str.as_str())?;
                Ok(Some((local_path, id, kind)))
            }
            None => Ok(None),
        }
    }

    /// `GetChecksum`.
    pub fn get_checksum(&self, local_path: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT checksum FROM sync_items WHERE local_relative_path = ?1",
            params![local_path],
            |row| row.get(0),
        )
        .optional()
        .map(|opt| opt.flatten())
        .map_err(SyncError::from)
    }

    /// `GetAllLocalPaths`, used by the local crawler's DB-only pass.
    pub fn get_all_local_paths(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT local_relative_path FROM sync_items")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    pub fn get_item(&self, local_path: &str) -> Result<Option<SyncItemRow>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT local_relative_path, remote_id, remote_relative_path, checksum, mtime_ms, kind
             FROM sync_items WHERE local_relative_path = ?1",
            params![local_path],
            SyncItemRow::from_row,
        )
        .optional()
        .map_err(SyncError::from)
    }

    /// Replaces (or inserts) the persisted row for an item, atomically.
    pub fn upsert_item(&self, item: &SyncItemRow) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sync_items
                (local_relative_path, remote_id, remote_relative_path, checksum, mtime_ms, kind, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))
             ON CONFLICT(local_relative_path) DO UPDATE SET
                remote_id = excluded.remote_id,
                remote_relative_path = excluded.remote_relative_path,
                checksum = excluded.checksum,
                mtime_ms = excluded.mtime_ms,
                kind = excluded.kind,
                updated_at = excluded.updated_at",
            params![
                item.local_relative_path,
                item.remote_id,
                item.remote_relative_path,
                item.checksum,
                item.mtime_ms,
                item.kind.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Deletes the persisted row for an item (a stale DB row purge or a
    /// completed delete propagation).
    pub fn delete_item(&self, local_path: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM sync_items WHERE local_relative_path = ?1",
            params![local_path],
        )?;
        Ok(())
    }
}
