pub mod migrations;
pub mod operations;
pub mod sync;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// Connection-pooled facade over the sync database (§3.4). Readers may run
/// concurrently; writes are serialized by SQLite itself under WAL mode.
#[derive(Clone)]
pub struct DbManager {
    pool: Pool<SqliteConnectionManager>,
}

impl DbManager {
    /// Opens (creating if needed) the sync database at the platform data
    /// directory.
    pub fn new() -> Result<Self> {
        Self::open(&default_db_path()?)
    }

    /// Opens a sync database at an explicit path, primarily for tests.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::DbCorruption(format!("failed to create database directory: {}", e)))?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| SyncError::DbCorruption(format!("failed to create connection pool: {}", e)))?;

        {
            let conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )
            .map_err(|e| SyncError::DbCorruption(format!("failed to configure database: {}", e)))?;

            migrations::run_migrations(&conn)?;
        }

        log::info!("sync database initialized at {:?}", db_path);

        Ok(Self { pool })
    }

    /// Gets a pooled connection.
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| SyncError::DbCorruption("could not determine data directory".to_string()))?;
    Ok(data_dir.join("cmis-sync").join("sync.db"))
}
