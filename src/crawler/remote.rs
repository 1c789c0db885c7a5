use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::cmis::CmisSession;
use crate::error::Result;
use crate::model::{DependencyGraph, ObjectKind, RemoteView};

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub remote_view: RemoteView,
    pub is_folder: bool,
}

struct BufferInner {
    order: Vec<String>,
    entries: HashMap<String, RemoteEntry>,
}

/// The shared ordered buffer the remote crawler fills and the assembler later
/// drains. Insertion order matters: parents are always inserted before their
/// children because the crawler walks depth-first.
pub struct RemoteBuffer {
    inner: Mutex<BufferInner>,
}

impl RemoteBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.contains_key(key)
    }

    pub fn insert(&self, key: String, entry: RemoteEntry) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(&key) {
            inner.order.push(key.clone());
        }
        inner.entries.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<RemoteEntry> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    /// Snapshot of `(key, entry)` pairs in insertion order.
    pub fn drain_in_order(&self) -> Vec<(String, RemoteEntry)> {
        let mut inner = self.inner.lock().unwrap();
        let pairs = inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).map(|e| (key.clone(), e.clone())))
            .collect();
        inner.order.clear();
        inner.entries.clear();
        pairs
    }
}

impl Default for RemoteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_name(remote_path: &str, is_folder: bool, lowercase: bool) -> String {
    let trimmed = remote_path.trim_start_matches('/');
    let mut name = if lowercase {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    };
    if is_folder && !name.ends_with('/') {
        name.push('/');
    }
    name
}

/// Walks the remote tree depth-first via `GetChildren`, filling a shared
/// ordered buffer and a private dependency graph (`r_idps`: parent remote
/// folder depends on each remote child) that the assembler merges into the
/// main graph for remote-only folders.
pub struct RemoteCrawler {
    session: Arc<dyn CmisSession>,
    lowercase: bool,
}

impl RemoteCrawler {
    pub fn new(session: Arc<dyn CmisSession>, lowercase: bool) -> Self {
        Self { session, lowercase }
    }

    pub async fn crawl(&self, buffer: Arc<RemoteBuffer>) -> Result<Arc<DependencyGraph>> {
        let r_idps = Arc::new(DependencyGraph::new());
        self.walk(String::new(), String::new(), buffer, r_idps.clone())
            .await?;
        Ok(r_idps)
    }

    fn walk(
        &self,
        folder_id: String,
        parent_key: String,
        buffer: Arc<RemoteBuffer>,
        r_idps: Arc<DependencyGraph>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let children = self.session.get_children(&folder_id).await?;
            for child in children {
                let is_folder = child.kind == ObjectKind::Folder;
                let key = canonical_name(&child.path, is_folder, self.lowercase);
                let entry = RemoteEntry {
                    remote_view: RemoteView {
                        id: child.id.clone(),
                        remote_relative_path: child.path.clone(),
                        checksum: child.checksum.clone(),
                        mtime_ms: child.mtime_ms,
                        kind: child.kind,
                        size: child.size,
                    },
                    is_folder,
                };
                buffer.insert(key.clone(), entry);

                if !parent_key.is_empty() {
                    r_idps.add(&parent_key, &key);
                }

                if is_folder {
                    self.walk(child.id.clone(), key, buffer.clone(), r_idps.clone())
                        .await?;
                }
            }
            Ok(())
        })
    }
}
