use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cmis_sync_core::cmis::{ChangeBatch, ChangeEvent, ChangeEventType, CmisSession, InMemoryCmisSession, RemoteObject};
use cmis_sync_core::config::SyncConfig;
use cmis_sync_core::db::sync::SyncItemRow;
use cmis_sync_core::db::DbManager;
use cmis_sync_core::model::ObjectKind;
use cmis_sync_core::pipeline::run_once;
use sha2::{Digest, Sha256};
use tempfile::tempdir;

fn hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn open_db() -> (DbManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = DbManager::open(&dir.path().join("sync.db")).unwrap();
    (db, dir)
}

/// Scenario 1: clean remote-only create via the change-log path.
#[tokio::test]
async fn clean_remote_only_create() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    db.set_change_log_token("T0").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.set_change_log_token("T1");
    session.seed_object(
        RemoteObject {
            id: "obj-b".to_string(),
            path: "a/b.txt".to_string(),
            kind: ObjectKind::Document,
            checksum: Some(hash(b"0123456789")),
            mtime_ms: 0,
            size: 10,
            content: None,
        },
        Some(b"0123456789".to_vec()),
    );
    session.queue_change_batch(ChangeBatch {
        events: vec![
            ChangeEvent {
                object_id: "dropped-by-quirk".to_string(),
                event_type: ChangeEventType::Created,
                timestamp_100ns: Some(0),
            },
            ChangeEvent {
                object_id: "obj-b".to_string(),
                event_type: ChangeEventType::Created,
                timestamp_100ns: Some(1),
            },
        ],
        latest_token: Some("T1".to_string()),
        has_more: false,
    });

    run_once(
        session,
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read(root.path().join("a/b.txt")).unwrap(),
        b"0123456789"
    );
    assert!(db.get_item("a/b.txt").unwrap().is_some());
    assert_eq!(db.get_change_log_token().unwrap(), Some("T1".to_string()));
}

/// Scenario 2: local-only create, discovered via full crawl since there is
/// no prior token.
#[tokio::test]
async fn local_only_create_via_full_crawl() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("a")).unwrap();
    std::fs::write(root.path().join("a/b.txt"), b"new file").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.set_change_log_token("T0");

    run_once(
        session.clone(),
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert!(session.get_object_by_path("a", false).await.is_ok());
    assert!(session.get_object_by_path("a/b.txt", false).await.is_ok());
    assert!(db.get_item("a/b.txt").unwrap().is_some());
    assert_eq!(db.get_change_log_token().unwrap(), Some("T0".to_string()));
}

/// Scenario 3: a server-side deletion of a populated folder must delete
/// contents before the folder, and never attempt to remove a non-empty
/// directory.
#[tokio::test]
async fn remote_delete_of_populated_folder_orders_children_first() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("x")).unwrap();
    std::fs::write(root.path().join("x/y.txt"), b"y").unwrap();
    std::fs::write(root.path().join("x/z.txt"), b"z").unwrap();

    for (path, id, kind) in [
        ("x/", "id-x", ObjectKind::Folder),
        ("x/y.txt", "id-y", ObjectKind::Document),
        ("x/z.txt", "id-z", ObjectKind::Document),
    ] {
        db.upsert_item(&SyncItemRow {
            local_relative_path: path.to_string(),
            remote_id: Some(id.to_string()),
            remote_relative_path: Some(path.to_string()),
            checksum: None,
            mtime_ms: 0,
            kind,
        })
        .unwrap();
    }
    db.set_change_log_token("T0").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.set_change_log_token("T1");
    session.queue_change_batch(ChangeBatch {
        events: vec![
            ChangeEvent {
                object_id: "dropped-by-quirk".to_string(),
                event_type: ChangeEventType::Deleted,
                timestamp_100ns: Some(0),
            },
            ChangeEvent {
                object_id: "id-z".to_string(),
                event_type: ChangeEventType::Deleted,
                timestamp_100ns: Some(1),
            },
            ChangeEvent {
                object_id: "id-y".to_string(),
                event_type: ChangeEventType::Deleted,
                timestamp_100ns: Some(2),
            },
            ChangeEvent {
                object_id: "id-x".to_string(),
                event_type: ChangeEventType::Deleted,
                timestamp_100ns: Some(3),
            },
        ],
        latest_token: Some("T1".to_string()),
        has_more: false,
    });

    run_once(
        session,
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert!(!root.path().join("x").exists());
    assert!(db.get_item("x/").unwrap().is_none());
    assert!(db.get_item("x/y.txt").unwrap().is_none());
    assert!(db.get_item("x/z.txt").unwrap().is_none());
}

/// Scenario 4: a conflicting edit on both sides keeps both copies.
#[tokio::test]
async fn conflicting_edit_keeps_both_copies() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("b.txt"), b"local-edit").unwrap();

    db.upsert_item(&SyncItemRow {
        local_relative_path: "b.txt".to_string(),
        remote_id: Some("obj-b".to_string()),
        remote_relative_path: Some("b.txt".to_string()),
        checksum: Some(hash(b"original")),
        mtime_ms: 1,
        kind: ObjectKind::Document,
    })
    .unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.seed_object(
        RemoteObject {
            id: "obj-b".to_string(),
            path: "b.txt".to_string(),
            kind: ObjectKind::Document,
            checksum: Some(hash(b"remote-edit")),
            mtime_ms: 2,
            size: 11,
            content: None,
        },
        Some(b"remote-edit".to_vec()),
    );

    run_once(
        session,
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read(root.path().join("b.txt")).unwrap(),
        b"remote-edit"
    );
    let has_conflict_copy = std::fs::read_dir(root.path())
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().contains("conflict"));
    assert!(has_conflict_copy, "expected the local edit to survive under a conflict name");
}

/// Scenario 5: an `Updated` event during change-log processing escalates to
/// a full crawl rather than applying a partial update.
#[tokio::test]
async fn update_event_escalates_to_full_crawl() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    db.set_change_log_token("T0").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.set_change_log_token("T1");
    session.queue_change_batch(ChangeBatch {
        events: vec![
            ChangeEvent {
                object_id: "dropped-by-quirk".to_string(),
                event_type: ChangeEventType::Created,
                timestamp_100ns: Some(0),
            },
            ChangeEvent {
                object_id: "obj-updated".to_string(),
                event_type: ChangeEventType::Updated,
                timestamp_100ns: Some(1),
            },
        ],
        latest_token: Some("T1".to_string()),
        has_more: false,
    });

    run_once(
        session,
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    // The change-log path never advanced the token directly; the fallback
    // full crawl captured the server's token and persisted that instead.
    assert_eq!(db.get_change_log_token().unwrap(), Some("T1".to_string()));
}

/// Scenario 6: a case-insensitive server collision between two local entries
/// resolves by keeping the one that matches the server and renaming the
/// other aside as a conflict copy.
#[tokio::test]
async fn case_insensitive_collision_resolves_via_conflict_rename() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("Foo.txt"), b"shared").unwrap();
    std::fs::write(root.path().join("foo.TXT"), b"different").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.seed_object(
        RemoteObject {
            id: "obj-foo".to_string(),
            path: "Foo.txt".to_string(),
            kind: ObjectKind::Document,
            checksum: Some(hash(b"shared")),
            mtime_ms: 0,
            size: 6,
            content: None,
        },
        Some(b"shared".to_vec()),
    );

    let mut config = SyncConfig::default();
    config.ignore_if_same_lowercase_names = true;

    run_once(
        session,
        db.clone(),
        config,
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read(root.path().join("Foo.txt")).unwrap(),
        b"shared"
    );
    assert_eq!(
        std::fs::read(root.path().join("foo.TXT")).unwrap(),
        b"shared"
    );
    let has_conflict_copy = std::fs::read_dir(root.path())
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().contains("conflict"));
    assert!(has_conflict_copy, "expected the losing duplicate to survive under a conflict name");
}

/// A triplet that fails to process (here, a document with no backing content)
/// must leave the change-log token where it was, so the next run re-fetches
/// and retries it instead of cursoring past the failure.
#[tokio::test]
async fn token_not_advanced_when_a_triplet_fails() {
    let (db, _db_dir) = open_db();
    let root = tempdir().unwrap();
    db.set_change_log_token("T0").unwrap();

    let session = Arc::new(InMemoryCmisSession::new());
    session.set_change_log_token("T1");
    session.seed_object(
        RemoteObject {
            id: "obj-broken".to_string(),
            path: "broken.txt".to_string(),
            kind: ObjectKind::Document,
            checksum: Some(hash(b"irrelevant")),
            mtime_ms: 0,
            size: 0,
            content: None,
        },
        None,
    );
    session.queue_change_batch(ChangeBatch {
        events: vec![
            ChangeEvent {
                object_id: "dropped-by-quirk".to_string(),
                event_type: ChangeEventType::Created,
                timestamp_100ns: Some(0),
            },
            ChangeEvent {
                object_id: "obj-broken".to_string(),
                event_type: ChangeEventType::Created,
                timestamp_100ns: Some(1),
            },
        ],
        latest_token: Some("T1".to_string()),
        has_more: false,
    });

    run_once(
        session,
        db.clone(),
        SyncConfig::default(),
        root.path().to_path_buf(),
        Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    assert_eq!(db.get_change_log_token().unwrap(), Some("T0".to_string()));
    assert!(!root.path().join("broken.txt").exists());
}
