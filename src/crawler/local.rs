use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::Sender;

use crate::db::DbManager;
use crate::error::{Result, SyncError};
use crate::model::{DbView, LocalView, ObjectKind, SyncTriplet};

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('~') || (name.starts_with('#') && name.ends_with('#'))
}

fn to_canonical(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

/// Walks the local tree depth-first, emitting a semi-triplet per entry (plus
/// the database view when the item was already tracked), and a final pass
/// over `GetAllLocalPaths` for entries the database remembers but the disk no
/// longer has.
pub struct LocalCrawler {
    root: PathBuf,
    db: DbManager,
}

impl LocalCrawler {
    pub fn new(root: PathBuf, db: DbManager) -> Self {
        Self { root, db }
    }

    pub async fn crawl(&self, sender: Sender<SyncTriplet>) -> Result<()> {
        let db = self.db.clone();
        let root = self.root.clone();
        let triplets = tokio::task::spawn_blocking(move || Self::walk(&root, &db))
            .await
            .map_err(|e| SyncError::TransportTransient(e.to_string()))??;

        for triplet in triplets {
            if sender.send(triplet).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    fn walk(root: &Path, db: &DbManager) -> Result<Vec<SyncTriplet>> {
        let mut triplets = Vec::new();
        let mut seen = HashSet::new();
        if root.exists() {
            Self::walk_dir(root, root, db, &mut triplets, &mut seen)?;
        }

        for local_path in db.get_all_local_paths()? {
            if seen.contains(&local_path) {
                continue;
            }
            if let Some(item) = db.get_item(&local_path)? {
                let is_folder = item.kind == ObjectKind::Folder;
                let db_view = DbView {
                    remote_id: item.remote_id.unwrap_or_default(),
                    remote_relative_path: item.remote_relative_path.unwrap_or_default(),
                    checksum: item.checksum,
                    mtime_ms: item.mtime_ms,
                    kind: item.kind,
                };
                triplets.push(SyncTriplet::from_db(local_path, is_folder, db_view));
            }
        }

        Ok(triplets)
    }

    fn walk_dir(
        base: &Path,
        current: &Path,
        db: &DbManager,
        triplets: &mut Vec<SyncTriplet>,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let entries = std::fs::read_dir(current)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_ignored(&name) {
                continue;
            }

            let relative = path.strip_prefix(base).unwrap_or(&path);
            let is_folder = path.is_dir();
            let mut key = to_canonical(relative);
            if is_folder && !key.ends_with('/') {
                key.push('/');
            }

            let metadata = std::fs::metadata(&path)?;
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            let local_view = LocalView {
                absolute_path: path.clone(),
                relative_path: key.trim_end_matches('/').to_string(),
                size: if is_folder { 0 } else { metadata.len() },
                mtime_ms,
                content_hash: None,
            };

            let mut triplet = SyncTriplet::from_local(key.clone(), is_folder, local_view);
            let db_lookup_key = key.trim_end_matches('/');
            if let Some(item) = db.get_item(db_lookup_key)? {
                triplet.merge_db(DbView {
                    remote_id: item.remote_id.unwrap_or_default(),
                    remote_relative_path: item.remote_relative_path.unwrap_or_default(),
                    checksum: item.checksum,
                    mtime_ms: item.mtime_ms,
                    kind: item.kind,
                });
            }

            seen.insert(db_lookup_key.to_string());
            triplets.push(triplet);

            if is_folder {
                Self::walk_dir(base, &path, db, triplets, seen)?;
            }
        }
        Ok(())
    }
}
