use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::cmis::CmisSession;
use crate::config::SyncConfig;
use crate::crawler::{LocalCrawler, RemoteBuffer, RemoteCrawler};
use crate::db::DbManager;
use crate::error::{Result, SyncError};
use crate::model::{DbView, DependencyGraph, RemoteView, SyncTriplet};

/// Joins semi-triplets into full triplets and pushes each key exactly once
/// onto the processor's queue.
pub struct Assembler {
    db: DbManager,
    config: SyncConfig,
    dependencies: Arc<DependencyGraph>,
}

impl Assembler {
    pub fn new(db: DbManager, config: SyncConfig, dependencies: Arc<DependencyGraph>) -> Self {
        Self {
            db,
            config,
            dependencies,
        }
    }

    /// Change-log mode: the ingester already produced (mostly) full triplets;
    /// enrich with the database view via `GetPathById` when the ingester only
    /// had a remote id.
    pub async fn assemble_changelog(
        &self,
        triplets: Vec<SyncTriplet>,
        sender: Sender<SyncTriplet>,
    ) -> Result<()> {
        for mut triplet in triplets {
            if triplet.db.is_none() {
                if let Some(remote) = triplet.remote.clone() {
                    if let Some((local_path, remote_id, kind)) =
                        self.db.get_path_by_id(&remote.id)?
                    {
                        let checksum = self.db.get_checksum(&local_path)?;
                        triplet.merge_db(DbView {
                            remote_id,
                            remote_relative_path: local_path,
                            checksum,
                            mtime_ms: remote.mtime_ms,
                            kind,
                        });
                    }
                }
            }
            if sender.send(triplet).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Crawler mode: runs the local crawler inline against the local
    /// semi-triplet stream while the remote crawler walks the server tree
    /// concurrently into a shared ordered buffer, then reconciles whatever
    /// the local pass never matched.
    pub async fn assemble_crawl(
        &self,
        local_root: PathBuf,
        session: Arc<dyn CmisSession>,
        sender: Sender<SyncTriplet>,
    ) -> Result<()> {
        let lowercase = self.config.ignore_if_same_lowercase_names;
        let buffer = Arc::new(RemoteBuffer::new());

        let remote_session = session.clone();
        let remote_buffer = buffer.clone();
        let remote_task = tokio::spawn(async move {
            RemoteCrawler::new(remote_session, lowercase)
                .crawl(remote_buffer)
                .await
        });

        let local_crawler = LocalCrawler::new(local_root, self.db.clone());
        let (local_tx, mut local_rx) = tokio::sync::mpsc::channel(self.config.queue_capacity);
        let local_task = tokio::spawn(async move { local_crawler.crawl(local_tx).await });

        let mut processed: HashSet<String> = HashSet::new();

        while let Some(mut triplet) = local_rx.recv().await {
            let lookup_key = Self::lookup_key(&triplet.name, lowercase);

            if let Some(entry) = buffer.get(&lookup_key) {
                triplet.merge_remote(entry.remote_view);
            } else {
                let remote_path = triplet
                    .db
                    .as_ref()
                    .map(|d| d.remote_relative_path.clone())
                    .unwrap_or_else(|| triplet.name.trim_end_matches('/').to_string());
                match session.get_object_by_path(&remote_path, false).await {
                    Ok(object) => {
                        triplet.merge_remote(RemoteView {
                            id: object.id,
                            remote_relative_path: object.path,
                            checksum: object.checksum,
                            mtime_ms: object.mtime_ms,
                            kind: object.kind,
                            size: object.size,
                        });
                    }
                    Err(SyncError::ObjectNotFound(_)) => {}
                    Err(other) => return Err(other),
                }
            }

            processed.insert(lookup_key);
            if sender.send(triplet).await.is_err() {
                break;
            }
        }

        local_task
            .await
            .map_err(|e| SyncError::TransportTransient(e.to_string()))??;
        let r_idps = remote_task
            .await
            .map_err(|e| SyncError::TransportTransient(e.to_string()))??;

        for (key, entry) in buffer.drain_in_order() {
            let lookup_key = Self::lookup_key(&key, lowercase);
            if processed.contains(&lookup_key) {
                continue;
            }

            if entry.is_folder {
                for child in r_idps.dependencies_of(&key) {
                    self.dependencies.add(&key, &child);
                }
            }

            let triplet = SyncTriplet::from_remote(key, entry.is_folder, entry.remote_view);
            if sender.send(triplet).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    fn lookup_key(name: &str, lowercase: bool) -> String {
        if lowercase {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmis::{InMemoryCmisSession, RemoteObject};
    use crate::model::ObjectKind;
    use tempfile::tempdir;

    fn open_db() -> (DbManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DbManager::open(&dir.path().join("sync.db")).unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn local_only_item_gets_a_full_triplet_with_no_remote_view() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("only-local.txt"), b"hi").unwrap();

        let session: Arc<dyn CmisSession> = Arc::new(InMemoryCmisSession::new());
        let dependencies = Arc::new(DependencyGraph::new());
        let assembler = Assembler::new(db, SyncConfig::default(), dependencies);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        assembler
            .assemble_crawl(root.path().to_path_buf(), session, tx)
            .await
            .unwrap();

        let triplet = rx.recv().await.unwrap();
        assert_eq!(triplet.name, "only-local.txt");
        assert!(triplet.has_local());
        assert!(!triplet.has_remote());
    }

    #[tokio::test]
    async fn remote_only_item_surfaces_after_local_pass_drains() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();

        let session = Arc::new(InMemoryCmisSession::new());
        session.seed_object(
            RemoteObject {
                id: "d1".into(),
                path: "remote-only.txt".into(),
                kind: ObjectKind::Document,
                checksum: Some("h".into()),
                mtime_ms: 0,
                size: 4,
                content: None,
            },
            Some(vec![1, 2, 3, 4]),
        );
        let session: Arc<dyn CmisSession> = session;

        let dependencies = Arc::new(DependencyGraph::new());
        let assembler = Assembler::new(db, SyncConfig::default(), dependencies);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        assembler
            .assemble_crawl(root.path().to_path_buf(), session, tx)
            .await
            .unwrap();

        let triplet = rx.recv().await.unwrap();
        assert_eq!(triplet.name, "remote-only.txt");
        assert!(triplet.has_remote());
        assert!(!triplet.has_local());
    }
}
