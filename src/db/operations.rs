use rusqlite::params;

use super::sync::SyncItemRow;
use super::DbManager;
use crate::error::Result;
use crate::model::ObjectKind;

/// The kind of operation recorded against the history log, matching the
/// four facade methods in §3.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperationType {
    Upload,
    Download,
    Delete,
    Rename,
}

impl std::fmt::Display for SyncOperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOperationType::Upload => write!(f, "upload"),
            SyncOperationType::Download => write!(f, "download"),
            SyncOperationType::Delete => write!(f, "delete"),
            SyncOperationType::Rename => write!(f, "rename"),
        }
    }
}

impl DbManager {
    fn log_operation(
        &self,
        operation: SyncOperationType,
        local_relative_path: &str,
        dest_relative_path: Option<&str>,
        remote_id: Option<&str>,
        size: Option<u64>,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sync_operations
                (operation, local_relative_path, dest_relative_path, remote_id, size, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'completed')",
            params![
                operation.to_string(),
                local_relative_path,
                dest_relative_path,
                remote_id,
                size.map(|s| s as i64),
            ],
        )?;
        Ok(())
    }

    /// `RecordUpload`: a local item was pushed to the server. Persists the
    /// new remote identity and logs the operation.
    pub fn record_upload(
        &self,
        local_relative_path: &str,
        remote_id: &str,
        remote_relative_path: &str,
        checksum: Option<&str>,
        mtime_ms: i64,
        kind: ObjectKind,
        size: u64,
    ) -> Result<()> {
        self.upsert_item(&SyncItemRow {
            local_relative_path: local_relative_path.to_string(),
            remote_id: Some(remote_id.to_string()),
            remote_relative_path: Some(remote_relative_path.to_string()),
            checksum: checksum.map(|s| s.to_string()),
            mtime_ms,
            kind,
        })?;
        self.log_operation(
            SyncOperationType::Upload,
            local_relative_path,
            None,
            Some(remote_id),
            Some(size),
        )
    }

    /// `RecordDownload`: a remote item was pulled to disk. Persists the
    /// refreshed local state and logs the operation.
    pub fn record_download(
        &self,
        local_relative_path: &str,
        remote_id: &str,
        remote_relative_path: &str,
        checksum: Option<&str>,
        mtime_ms: i64,
        kind: ObjectKind,
        size: u64,
    ) -> Result<()> {
        self.upsert_item(&SyncItemRow {
            local_relative_path: local_relative_path.to_string(),
            remote_id: Some(remote_id.to_string()),
            remote_relative_path: Some(remote_relative_path.to_string()),
            checksum: checksum.map(|s| s.to_string()),
            mtime_ms,
            kind,
        })?;
        self.log_operation(
            SyncOperationType::Download,
            local_relative_path,
            None,
            Some(remote_id),
            Some(size),
        )
    }

    /// `RecordDelete`: the item no longer exists on either side worth
    /// tracking. Purges its row and logs the operation.
    pub fn record_delete(&self, local_relative_path: &str) -> Result<()> {
        self.delete_item(local_relative_path)?;
        self.log_operation(SyncOperationType::Delete, local_relative_path, None, None, None)
    }

    /// `RecordRename`: a local conflict rename moved `from` to `to`. The new
    /// path inherits whatever remote identity the old one may have had.
    pub fn record_rename(&self, from_relative_path: &str, to_relative_path: &str) -> Result<()> {
        let previous = self.get_item(from_relative_path)?;
        self.delete_item(from_relative_path)?;
        if let Some(previous) = previous {
            self.upsert_item(&SyncItemRow {
                local_relative_path: to_relative_path.to_string(),
                ..previous
            })?;
        }
        self.log_operation(
            SyncOperationType::Rename,
            from_relative_path,
            Some(to_relative_path),
            None,
            None,
        )
    }
}
