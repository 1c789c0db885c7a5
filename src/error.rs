use serde::Serialize;
use thiserror::Error;

/// The six error kinds the sync core distinguishes, in propagation order of severity.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transport error: {0}")]
    TransportTransient(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("change log unusable, escalating to full sync: {0}")]
    ChangeLogUnsupported(String),

    #[error("database corruption: {0}")]
    DbCorruption(String),

    #[error("conflict detected for {0}")]
    ConflictDetected(String),

    #[error("sync cancelled")]
    Cancelled,
}

impl Serialize for SyncError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => SyncError::ObjectNotFound(err.to_string()),
            other => SyncError::DbCorruption(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::DbCorruption(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::ObjectNotFound(err.to_string())
        } else {
            SyncError::TransportTransient(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
