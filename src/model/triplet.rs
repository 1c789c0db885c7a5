use std::path::PathBuf;

/// Whether a synced object is a folder or a document (CMIS terminology).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Folder,
    Document,
}

/// What the local filesystem currently holds for this item.
#[derive(Debug, Clone)]
pub struct LocalView {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub mtime_ms: i64,
    /// Computed lazily; `None` until the processor needs it.
    pub content_hash: Option<String>,
}

/// What the prior-sync database recorded for this item.
#[derive(Debug, Clone)]
pub struct DbView {
    pub remote_id: String,
    pub remote_relative_path: String,
    pub checksum: Option<String>,
    pub mtime_ms: i64,
    pub kind: ObjectKind,
}

/// What the server currently reports for this item.
#[derive(Debug, Clone)]
pub struct RemoteView {
    pub id: String,
    pub remote_relative_path: String,
    pub checksum: Option<String>,
    pub mtime_ms: i64,
    pub kind: ObjectKind,
    pub size: u64,
}

/// The three-way join of local, database, and remote views of one syncable item,
/// keyed by its canonical name (path relative to the sync root, `/`-separated,
/// folder names terminated by `/`, optionally lowercased for case-insensitive
/// servers).
#[derive(Debug, Clone)]
pub struct SyncTriplet {
    pub name: String,
    pub is_folder: bool,
    pub local: Option<LocalView>,
    pub db: Option<DbView>,
    pub remote: Option<RemoteView>,
}

impl SyncTriplet {
    /// Builds a triplet with only the local view populated. A semi-triplet
    /// produced by the local crawler.
    pub fn from_local(name: impl Into<String>, is_folder: bool, local: LocalView) -> Self {
        Self {
            name: name.into(),
            is_folder,
            local: Some(local),
            db: None,
            remote: None,
        }
    }

    /// Builds a triplet with only the remote view populated. A semi-triplet
    /// produced by the remote crawler or the change-log ingester.
    pub fn from_remote(name: impl Into<String>, is_folder: bool, remote: RemoteView) -> Self {
        Self {
            name: name.into(),
            is_folder,
            local: None,
            db: None,
            remote: Some(remote),
        }
    }

    /// Builds a triplet with only the database view populated, used to
    /// synthesize deletion semi-triplets whose source side is already gone.
    pub fn from_db(name: impl Into<String>, is_folder: bool, db: DbView) -> Self {
        Self {
            name: name.into(),
            is_folder,
            local: None,
            db: Some(db),
            remote: None,
        }
    }

    /// Merges another view set into this triplet in place, keeping whichever
    /// side already had a value when both are populated.
    pub fn merge_remote(&mut self, remote: RemoteView) {
        self.remote = Some(remote);
    }

    pub fn merge_db(&mut self, db: DbView) {
        self.db = Some(db);
    }

    pub fn merge_local(&mut self, local: LocalView) {
        self.local = Some(local);
    }

    /// The invariant every triplet must satisfy before entering the pipeline:
    /// at least one view is present.
    pub fn is_valid(&self) -> bool {
        self.local.is_some() || self.db.is_some() || self.remote.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn has_db(&self) -> bool {
        self.db.is_some()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}
