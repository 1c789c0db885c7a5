use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{
    mpsc::{Receiver, Sender},
    Mutex,
};

use crate::cmis::CmisSession;
use crate::config::SyncConfig;
use crate::db::DbManager;
use crate::db::sync::SyncItemRow;
use crate::error::{Result, SyncError};
use crate::model::{DependencyGraph, DependencyOutcome, ObjectKind, SyncTriplet};

const QUIESCENCE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One unit of worker-pool traffic: either real work or a one-shot signal
/// telling a worker to stop. Requeued not-ready folder deletions travel as
/// `Triplet` just like fresh work.
enum WorkItem {
    Triplet(SyncTriplet),
    Stop,
}

/// True for the two decision-table actions that delete a folder — the only
/// actions gated by the dependency graph.
fn is_folder_deletion(triplet: &SyncTriplet) -> bool {
    triplet.is_folder
        && ((triplet.has_local() && triplet.has_db() && !triplet.has_remote())
            || (!triplet.has_local() && triplet.has_db() && triplet.has_remote()))
}

fn parent_key_of(key: &str) -> Option<String> {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => Some(format!("{}/", parent)),
        None => None,
    }
}

fn split_parent_and_name(key: &str) -> (String, String) {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn conflict_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|s| s.to_str());
    let ts = chrono::Utc::now().timestamp();
    let name = match ext {
        Some(ext) => format!("{} (conflict {}).{}", stem, ts, ext),
        None => format!("{} (conflict {})", stem, ts),
    };
    parent.join(name)
}

fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Consumes full triplets from a bounded queue with a fixed worker pool,
/// classifies each against the decision table, executes it, and releases the
/// triplet's parent dependency edge.
#[derive(Clone)]
pub struct Processor {
    session: Arc<dyn CmisSession>,
    db: DbManager,
    config: SyncConfig,
    dependencies: Arc<DependencyGraph>,
    local_root: PathBuf,
    cancel: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl Processor {
    pub fn new(
        session: Arc<dyn CmisSession>,
        db: DbManager,
        config: SyncConfig,
        dependencies: Arc<DependencyGraph>,
        local_root: PathBuf,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            db,
            config,
            dependencies,
            local_root,
            cancel,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once at least one triplet finished this run with `Fail`. The
    /// caller consults this after `run` returns `Ok` to decide whether the
    /// change-log token may advance (§7: the token advances only if the run
    /// completed without a FAIL).
    pub fn had_failures(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Drains `receiver` with `config.worker_count` concurrent workers. A
    /// feeder task forwards triplets from `receiver` into an internal
    /// requeueable channel and tracks how many are outstanding; once the
    /// feeder has seen the assembler's channel close and no triplet remains
    /// outstanding, each worker is sent an explicit stop signal. A worker
    /// that dequeues a not-yet-ready folder deletion puts it back on the
    /// queue and moves on to the next item rather than parking, so a single
    /// worker can still drain a folder's children instead of deadlocking on
    /// its own deletion.
    pub async fn run(&self, mut receiver: Receiver<SyncTriplet>) -> Result<()> {
        let worker_count = self.config.worker_count.max(1);
        let capacity = self.config.queue_capacity.max(worker_count);
        let (tx, rx) = tokio::sync::mpsc::channel::<WorkItem>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let feeding_done = Arc::new(AtomicBool::new(false));

        let feed_tx = tx.clone();
        let feed_outstanding = outstanding.clone();
        let feed_done = feeding_done.clone();
        let feeder = tokio::spawn(async move {
            while let Some(triplet) = receiver.recv().await {
                feed_outstanding.fetch_add(1, Ordering::SeqCst);
                if feed_tx.send(WorkItem::Triplet(triplet)).await.is_err() {
                    break;
                }
            }
            feed_done.store(true, Ordering::SeqCst);
        });

        let closer_tx = tx.clone();
        let closer_outstanding = outstanding.clone();
        let closer_done = feeding_done.clone();
        let closer = tokio::spawn(async move {
            loop {
                if closer_done.load(Ordering::SeqCst) && closer_outstanding.load(Ordering::SeqCst) == 0
                {
                    for _ in 0..worker_count {
                        if closer_tx.send(WorkItem::Stop).await.is_err() {
                            return;
                        }
                    }
                    return;
                }
                tokio::time::sleep(QUIESCENCE_POLL_INTERVAL).await;
            }
        });

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let worker = self.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            let outstanding = outstanding.clone();
            handles.push(tokio::spawn(async move { worker.worker_loop(rx, tx, outstanding).await }));
        }
        drop(tx);

        feeder
            .await
            .map_err(|e| SyncError::TransportTransient(e.to_string()))?;
        closer
            .await
            .map_err(|e| SyncError::TransportTransient(e.to_string()))?;
        for handle in handles {
            handle
                .await
                .map_err(|e| SyncError::TransportTransient(e.to_string()))??;
        }
        Ok(())
    }

    async fn worker_loop(
        &self,
        receiver: Arc<Mutex<Receiver<WorkItem>>>,
        sender: Sender<WorkItem>,
        outstanding: Arc<AtomicUsize>,
    ) -> Result<()> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(SyncError::Cancelled);
            }

            let item = {
                let mut guard = receiver.lock().await;
                guard.recv().await
            };
            let triplet = match item {
                Some(WorkItem::Triplet(t)) => t,
                Some(WorkItem::Stop) | None => break,
            };

            if is_folder_deletion(&triplet) && !self.dependencies.is_ready(&triplet.name) {
                if sender.send(WorkItem::Triplet(triplet)).await.is_err() {
                    break;
                }
                continue;
            }

            self.process_triplet(triplet).await;
            outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn process_triplet(&self, triplet: SyncTriplet) {
        let key = triplet.name.clone();
        let parent = parent_key_of(&key);

        if is_folder_deletion(&triplet) && self.dependencies.has_failed_dependency(&key) {
            log::warn!(
                "skipping deletion of {}: a child failed to process",
                key
            );
            self.failed.store(true, Ordering::Relaxed);
            if let Some(parent) = parent {
                self.dependencies.remove(&parent, &key, DependencyOutcome::Fail);
            }
            return;
        }

        let outcome = self.execute_with_retry(&triplet).await;
        if let Some(parent) = parent {
            self.dependencies.remove(&parent, &key, outcome);
        }
    }

    async fn execute_with_retry(&self, triplet: &SyncTriplet) -> DependencyOutcome {
        match self.execute(triplet).await {
            Ok(()) => DependencyOutcome::Succeed,
            Err(SyncError::Cancelled) => DependencyOutcome::Retry,
            Err(SyncError::TransportTransient(reason)) => {
                log::warn!(
                    "transient error processing {}: {}; retrying once",
                    triplet.name,
                    reason
                );
                match self.execute(triplet).await {
                    Ok(()) => DependencyOutcome::Succeed,
                    Err(e) => {
                        log::error!("giving up on {} after retry: {}", triplet.name, e);
                        self.failed.store(true, Ordering::Relaxed);
                        DependencyOutcome::Fail
                    }
                }
            }
            Err(e) => {
                log::error!("failed to process {}: {}", triplet.name, e);
                self.failed.store(true, Ordering::Relaxed);
                DependencyOutcome::Fail
            }
        }
    }

    async fn execute(&self, triplet: &SyncTriplet) -> Result<()> {
        match (triplet.has_local(), triplet.has_db(), triplet.has_remote()) {
            (true, false, false) => self.upload_new(triplet).await,
            (false, false, true) => self.download_new(triplet).await,
            (true, _, true) => self.reconcile_existing(triplet).await,
            (false, true, true) => self.delete_remote_for_local_deletion(triplet).await,
            (true, true, false) => self.delete_local_for_remote_deletion(triplet).await,
            (false, true, false) => self.purge_stale_row(triplet).await,
            (false, false, false) => {
                log::warn!("triplet {} has no populated view; skipping", triplet.name);
                Ok(())
            }
        }
    }

    async fn upload_new(&self, triplet: &SyncTriplet) -> Result<()> {
        let local = triplet
            .local
            .as_ref()
            .expect("upload_new requires a local view");
        let (parent_path, name) = split_parent_and_name(&triplet.name);

        if triplet.is_folder {
            let object = self.session.create_folder(&parent_path, &name).await?;
            self.db.record_upload(
                &triplet.name,
                &object.id,
                &object.path,
                None,
                local.mtime_ms,
                ObjectKind::Folder,
                0,
            )
        } else {
            let content = std::fs::read(&local.absolute_path)?;
            let hash = hash_bytes(&content);
            let object = self
                .session
                .create_document(&parent_path, &name, &content)
                .await?;
            self.db.record_upload(
                &triplet.name,
                &object.id,
                &object.path,
                Some(&hash),
                local.mtime_ms,
                ObjectKind::Document,
                content.len() as u64,
            )
        }
    }

    async fn download_new(&self, triplet: &SyncTriplet) -> Result<()> {
        let remote = triplet
            .remote
            .as_ref()
            .expect("download_new requires a remote view");
        let local_path = self.local_root.join(triplet.name.trim_end_matches('/'));

        if triplet.is_folder {
            std::fs::create_dir_all(&local_path)?;
            self.db.record_download(
                &triplet.name,
                &remote.id,
                &remote.remote_relative_path,
                None,
                remote.mtime_ms,
                ObjectKind::Folder,
                0,
            )
        } else {
            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = self.session.download_content(&remote.id).await?;
            std::fs::write(&local_path, &content)?;
            self.db.record_download(
                &triplet.name,
                &remote.id,
                &remote.remote_relative_path,
                remote.checksum.as_deref(),
                remote.mtime_ms,
                ObjectKind::Document,
                content.len() as u64,
            )
        }
    }

    async fn reconcile_existing(&self, triplet: &SyncTriplet) -> Result<()> {
        if triplet.is_folder {
            return self.refresh_metadata(triplet, ObjectKind::Folder).await;
        }

        let local = triplet
            .local
            .as_ref()
            .expect("reconcile_existing requires a local view");
        let remote = triplet
            .remote
            .as_ref()
            .expect("reconcile_existing requires a remote view");

        let local_hash = hash_bytes(&std::fs::read(&local.absolute_path)?);
        let remote_hash = remote.checksum.clone();

        if Some(local_hash.as_str()) == remote_hash.as_deref() {
            return self.refresh_metadata(triplet, ObjectKind::Document).await;
        }

        let db_hash = triplet.db.as_ref().and_then(|d| d.checksum.clone());
        let local_changed = db_hash.as_deref() != Some(local_hash.as_str());
        let remote_changed = db_hash != remote_hash;

        match (local_changed, remote_changed) {
            (true, false) => self.upload_over_existing(triplet, &local_hash).await,
            (false, true) => self.download_over_existing(triplet).await,
            _ => self.resolve_conflict_rename_then_download(triplet).await,
        }
    }

    /// "Same checksums" / no-op path: update the persisted row without
    /// touching either side's content.
    async fn refresh_metadata(&self, triplet: &SyncTriplet, kind: ObjectKind) -> Result<()> {
        let remote = triplet
            .remote
            .as_ref()
            .expect("refresh_metadata requires a remote view");
        let mtime_ms = triplet
            .local
            .as_ref()
            .map(|l| l.mtime_ms)
            .unwrap_or(remote.mtime_ms);
        self.db.upsert_item(&SyncItemRow {
            local_relative_path: triplet.name.clone(),
            remote_id: Some(remote.id.clone()),
            remote_relative_path: Some(remote.remote_relative_path.clone()),
            checksum: remote.checksum.clone(),
            mtime_ms,
            kind,
        })
    }

    async fn upload_over_existing(&self, triplet: &SyncTriplet, local_hash: &str) -> Result<()> {
        let local = triplet.local.as_ref().expect("checked by caller");
        let remote = triplet.remote.as_ref().expect("checked by caller");
        let content = std::fs::read(&local.absolute_path)?;
        self.session.upload_content(&remote.id, &content).await?;
        self.db.record_upload(
            &triplet.name,
            &remote.id,
            &remote.remote_relative_path,
            Some(local_hash),
            local.mtime_ms,
            ObjectKind::Document,
            content.len() as u64,
        )
    }

    async fn download_over_existing(&self, triplet: &SyncTriplet) -> Result<()> {
        let local = triplet.local.as_ref().expect("checked by caller");
        let remote = triplet.remote.as_ref().expect("checked by caller");
        let content = self.session.download_content(&remote.id).await?;
        std::fs::write(&local.absolute_path, &content)?;
        self.db.record_download(
            &triplet.name,
            &remote.id,
            &remote.remote_relative_path,
            remote.checksum.as_deref(),
            remote.mtime_ms,
            ObjectKind::Document,
            content.len() as u64,
        )
    }

    /// Both sides changed since the last sync: keep both. The local copy is
    /// renamed aside, then the server's copy is downloaded under the
    /// original name.
    async fn resolve_conflict_rename_then_download(&self, triplet: &SyncTriplet) -> Result<()> {
        let local = triplet.local.as_ref().expect("checked by caller");
        let remote = triplet.remote.as_ref().expect("checked by caller");

        let renamed_absolute = conflict_path(&local.absolute_path);
        std::fs::rename(&local.absolute_path, &renamed_absolute)?;
        let renamed_relative = relative_to_root(&self.local_root, &renamed_absolute);
        self.db.record_rename(&triplet.name, &renamed_relative)?;

        if let Some(parent) = local.absolute_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.session.download_content(&remote.id).await?;
        std::fs::write(&local.absolute_path, &content)?;
        self.db.record_download(
            &triplet.name,
            &remote.id,
            &remote.remote_relative_path,
            remote.checksum.as_deref(),
            remote.mtime_ms,
            ObjectKind::Document,
            content.len() as u64,
        )?;

        log::warn!(
            "conflict on {}: kept both, local copy renamed to {}",
            triplet.name,
            renamed_relative
        );
        Ok(())
    }

    /// Invoked only once the worker pool has confirmed `triplet.name` has no
    /// outstanding or failed children (see `is_folder_deletion`/`worker_loop`).
    async fn delete_remote_for_local_deletion(&self, triplet: &SyncTriplet) -> Result<()> {
        let db_view = triplet
            .db
            .as_ref()
            .expect("delete_remote_for_local_deletion requires a db view");
        self.session.delete_object(&db_view.remote_id).await?;
        self.db.record_delete(&triplet.name)
    }

    /// Invoked only once the worker pool has confirmed `triplet.name` has no
    /// outstanding or failed children (see `is_folder_deletion`/`worker_loop`).
    async fn delete_local_for_remote_deletion(&self, triplet: &SyncTriplet) -> Result<()> {
        let local = triplet
            .local
            .as_ref()
            .expect("delete_local_for_remote_deletion requires a local view");
        if triplet.is_folder {
            std::fs::remove_dir(&local.absolute_path)?;
        } else {
            std::fs::remove_file(&local.absolute_path)?;
        }
        self.db.record_delete(&triplet.name)
    }

    async fn purge_stale_row(&self, triplet: &SyncTriplet) -> Result<()> {
        self.db.record_delete(&triplet.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmis::InMemoryCmisSession;
    use crate::model::{DbView, LocalView, RemoteView};
    use tempfile::tempdir;

    fn open_db() -> (DbManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DbManager::open(&dir.path().join("sync.db")).unwrap();
        (db, dir)
    }

    fn processor(db: DbManager, root: PathBuf, session: Arc<InMemoryCmisSession>) -> Processor {
        Processor::new(
            session,
            db,
            SyncConfig::default(),
            Arc::new(DependencyGraph::new()),
            root,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn local_only_document_is_uploaded() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hello").unwrap();

        let session = Arc::new(InMemoryCmisSession::new());
        let proc = processor(db.clone(), root.path().to_path_buf(), session.clone());

        let local = LocalView {
            absolute_path: root.path().join("a.txt"),
            relative_path: "a.txt".to_string(),
            size: 5,
            mtime_ms: 1,
            content_hash: None,
        };
        let triplet = SyncTriplet::from_local("a.txt", false, local);
        proc.execute(&triplet).await.unwrap();

        assert!(db.get_item("a.txt").unwrap().is_some());
        assert_eq!(session.document_count(), 1);
    }

    #[tokio::test]
    async fn remote_only_document_is_downloaded() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();

        let session = Arc::new(InMemoryCmisSession::new());
        session.seed_object(
            crate::cmis::RemoteObject {
                id: "d1".to_string(),
                path: "b.txt".to_string(),
                kind: ObjectKind::Document,
                checksum: Some(hash_bytes(b"world")),
                mtime_ms: 1,
                size: 5,
                content: None,
            },
            Some(b"world".to_vec()),
        );

        let proc = processor(db.clone(), root.path().to_path_buf(), session);
        let remote = RemoteView {
            id: "d1".to_string(),
            remote_relative_path: "b.txt".to_string(),
            checksum: Some(hash_bytes(b"world")),
            mtime_ms: 1,
            kind: ObjectKind::Document,
            size: 5,
        };
        let triplet = SyncTriplet::from_remote("b.txt", false, remote);
        proc.execute(&triplet).await.unwrap();

        let content = std::fs::read(root.path().join("b.txt")).unwrap();
        assert_eq!(content, b"world");
        assert!(db.get_item("b.txt").unwrap().is_some());
    }

    #[tokio::test]
    async fn matching_checksums_are_a_no_op_refresh() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("c.txt"), b"same").unwrap();
        let hash = hash_bytes(b"same");

        let session = Arc::new(InMemoryCmisSession::new());
        let proc = processor(db.clone(), root.path().to_path_buf(), session);

        let mut triplet = SyncTriplet::from_local(
            "c.txt",
            false,
            LocalView {
                absolute_path: root.path().join("c.txt"),
                relative_path: "c.txt".to_string(),
                size: 4,
                mtime_ms: 1,
                content_hash: None,
            },
        );
        triplet.merge_db(DbView {
            remote_id: "d1".to_string(),
            remote_relative_path: "c.txt".to_string(),
            checksum: Some(hash.clone()),
            mtime_ms: 1,
            kind: ObjectKind::Document,
        });
        triplet.merge_remote(RemoteView {
            id: "d1".to_string(),
            remote_relative_path: "c.txt".to_string(),
            checksum: Some(hash),
            mtime_ms: 1,
            kind: ObjectKind::Document,
            size: 4,
        });

        proc.execute(&triplet).await.unwrap();
        assert_eq!(
            std::fs::read(root.path().join("c.txt")).unwrap(),
            b"same"
        );
    }

    #[tokio::test]
    async fn conflicting_edit_keeps_both() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("d.txt"), b"local-edit").unwrap();

        let session = Arc::new(InMemoryCmisSession::new());
        session.seed_object(
            crate::cmis::RemoteObject {
                id: "d1".to_string(),
                path: "d.txt".to_string(),
                kind: ObjectKind::Document,
                checksum: Some(hash_bytes(b"remote-edit")),
                mtime_ms: 5,
                size: 11,
                content: None,
            },
            Some(b"remote-edit".to_vec()),
        );

        let proc = processor(db.clone(), root.path().to_path_buf(), session);
        let mut triplet = SyncTriplet::from_local(
            "d.txt",
            false,
            LocalView {
                absolute_path: root.path().join("d.txt"),
                relative_path: "d.txt".to_string(),
                size: 10,
                mtime_ms: 5,
                content_hash: None,
            },
        );
        triplet.merge_db(DbView {
            remote_id: "d1".to_string(),
            remote_relative_path: "d.txt".to_string(),
            checksum: Some(hash_bytes(b"original")),
            mtime_ms: 1,
            kind: ObjectKind::Document,
        });
        triplet.merge_remote(RemoteView {
            id: "d1".to_string(),
            remote_relative_path: "d.txt".to_string(),
            checksum: Some(hash_bytes(b"remote-edit")),
            mtime_ms: 5,
            kind: ObjectKind::Document,
            size: 11,
        });

        proc.execute(&triplet).await.unwrap();

        assert_eq!(
            std::fs::read(root.path().join("d.txt")).unwrap(),
            b"remote-edit"
        );
        let mut entries: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|n| n.contains("conflict")));
    }

    #[tokio::test]
    async fn stale_db_row_is_purged() {
        let (db, _db_dir) = open_db();
        db.upsert_item(&SyncItemRow {
            local_relative_path: "gone.txt".to_string(),
            remote_id: None,
            remote_relative_path: None,
            checksum: None,
            mtime_ms: 0,
            kind: ObjectKind::Document,
        })
        .unwrap();
        let root = tempdir().unwrap();
        let session = Arc::new(InMemoryCmisSession::new());
        let proc = processor(db.clone(), root.path().to_path_buf(), session);

        let triplet = SyncTriplet::from_db(
            "gone.txt",
            false,
            DbView {
                remote_id: String::new(),
                remote_relative_path: String::new(),
                checksum: None,
                mtime_ms: 0,
                kind: ObjectKind::Document,
            },
        );
        proc.execute(&triplet).await.unwrap();
        assert!(db.get_item("gone.txt").unwrap().is_none());
    }

    /// Regression test: a single worker that dequeues a folder's deletion
    /// before its child must not park waiting on it, or the child (the only
    /// thing that can ever make the folder ready) would never be dequeued.
    #[tokio::test]
    async fn single_worker_drains_folder_child_before_its_own_deletion() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::create_dir(root.path().join("x")).unwrap();
        std::fs::write(root.path().join("x/y.txt"), b"y").unwrap();

        let session = Arc::new(InMemoryCmisSession::new());
        let mut config = SyncConfig::default();
        config.worker_count = 1;
        let dependencies = Arc::new(DependencyGraph::new());
        dependencies.add("x/", "x/y.txt");

        let proc = Processor::new(
            session,
            db.clone(),
            config,
            dependencies,
            root.path().to_path_buf(),
            Arc::new(AtomicBool::new(false)),
        );

        let mut folder = SyncTriplet::from_db(
            "x/",
            true,
            DbView {
                remote_id: String::new(),
                remote_relative_path: String::new(),
                checksum: None,
                mtime_ms: 0,
                kind: ObjectKind::Folder,
            },
        );
        folder.merge_local(LocalView {
            absolute_path: root.path().join("x"),
            relative_path: "x/".to_string(),
            size: 0,
            mtime_ms: 0,
            content_hash: None,
        });
        let mut child = SyncTriplet::from_db(
            "x/y.txt",
            false,
            DbView {
                remote_id: String::new(),
                remote_relative_path: String::new(),
                checksum: None,
                mtime_ms: 0,
                kind: ObjectKind::Document,
            },
        );
        child.merge_local(LocalView {
            absolute_path: root.path().join("x/y.txt"),
            relative_path: "x/y.txt".to_string(),
            size: 1,
            mtime_ms: 0,
            content_hash: None,
        });

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        // Folder enqueued ahead of its child: the sole worker must requeue it.
        tx.send(folder).await.unwrap();
        tx.send(child).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), proc.run(rx))
            .await
            .expect("processor deadlocked waiting on its own folder deletion")
            .unwrap();

        assert!(!root.path().join("x").exists());
        assert!(!proc.had_failures());
    }

    /// A child that fails to process must poison its parent's folder
    /// deletion rather than let the folder be removed out from under it.
    #[tokio::test]
    async fn failed_child_deletion_poisons_the_folder_deletion() {
        let (db, _db_dir) = open_db();
        let root = tempdir().unwrap();
        std::fs::create_dir(root.path().join("x")).unwrap();
        // x/y.txt is never created on disk, so removing it fails.

        let session = Arc::new(InMemoryCmisSession::new());
        let mut config = SyncConfig::default();
        config.worker_count = 1;
        let dependencies = Arc::new(DependencyGraph::new());
        dependencies.add("x/", "x/y.txt");

        let proc = Processor::new(
            session,
            db.clone(),
            config,
            dependencies,
            root.path().to_path_buf(),
            Arc::new(AtomicBool::new(false)),
        );

        let mut folder = SyncTriplet::from_db(
            "x/",
            true,
            DbView {
                remote_id: String::new(),
                remote_relative_path: String::new(),
                checksum: None,
                mtime_ms: 0,
                kind: ObjectKind::Folder,
            },
        );
        folder.merge_local(LocalView {
            absolute_path: root.path().join("x"),
            relative_path: "x/".to_string(),
            size: 0,
            mtime_ms: 0,
            content_hash: None,
        });
        let mut child = SyncTriplet::from_db(
            "x/y.txt",
            false,
            DbView {
                remote_id: String::new(),
                remote_relative_path: String::new(),
                checksum: None,
                mtime_ms: 0,
                kind: ObjectKind::Document,
            },
        );
        child.merge_local(LocalView {
            absolute_path: root.path().join("x/y.txt"),
            relative_path: "x/y.txt".to_string(),
            size: 0,
            mtime_ms: 0,
            content_hash: None,
        });

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(folder).await.unwrap();
        tx.send(child).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), proc.run(rx))
            .await
            .expect("processor deadlocked")
            .unwrap();

        assert!(
            root.path().join("x").exists(),
            "folder deletion should have been skipped after its child failed"
        );
        assert!(proc.had_failures());
    }
}
