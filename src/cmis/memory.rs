use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::cmis::session::{ChangeBatch, CmisSession, RemoteObject};
use crate::error::{Result, SyncError};
use crate::model::ObjectKind;

struct Inner {
    objects_by_id: HashMap<String, RemoteObject>,
    ids_by_path: HashMap<String, String>,
    contents: HashMap<String, Vec<u8>>,
    token: Option<String>,
    queued_batches: VecDeque<ChangeBatch>,
}

/// A deterministic, in-process stand-in for a real CMIS transport. Used by
/// integration tests to drive the pipeline end to end without a network. Not
/// a production CMIS client: it has no wire format and keeps everything in a
/// mutex-guarded map.
pub struct InMemoryCmisSession {
    inner: Mutex<Inner>,
}

impl InMemoryCmisSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects_by_id: HashMap::new(),
                ids_by_path: HashMap::new(),
                contents: HashMap::new(),
                token: None,
                queued_batches: VecDeque::new(),
            }),
        }
    }

    pub fn set_change_log_token(&self, token: impl Into<String>) {
        self.inner.lock().unwrap().token = Some(token.into());
    }

    /// Seeds the server tree directly, bypassing `create_document`/`create_folder`.
    pub fn seed_object(&self, object: RemoteObject, content: Option<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.ids_by_path.insert(object.path.clone(), object.id.clone());
        if let Some(bytes) = content {
            inner.contents.insert(object.id.clone(), bytes);
        }
        inner.objects_by_id.insert(object.id.clone(), object);
    }

    /// Queues one page to be returned by the next `get_content_changes` call.
    pub fn queue_change_batch(&self, batch: ChangeBatch) {
        self.inner.lock().unwrap().queued_batches.push_back(batch);
    }

    /// Test helper: counts seeded/created documents.
    pub fn document_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .objects_by_id
            .values()
            .filter(|o| o.kind == ObjectKind::Document)
            .count()
    }

    fn is_direct_child(parent_path: &str, candidate_path: &str) -> bool {
        if parent_path.is_empty() {
            return !candidate_path.is_empty() && !candidate_path.contains('/');
        }
        match candidate_path.strip_prefix(parent_path) {
            Some(rest) => {
                let rest = rest.strip_prefix('/').unwrap_or(rest);
                !rest.is_empty() && !rest.contains('/')
            }
            None => false,
        }
    }
}

impl Default for InMemoryCmisSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CmisSession for InMemoryCmisSession {
    async fn get_change_log_token(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().token.clone())
    }

    async fn get_content_changes(
        &self,
        _since_token: Option<&str>,
        _include_properties: bool,
        _max_items: u32,
    ) -> Result<ChangeBatch> {
        let mut inner = self.inner.lock().unwrap();
        match inner.queued_batches.pop_front() {
            Some(batch) => Ok(batch),
            None => Ok(ChangeBatch {
                events: Vec::new(),
                latest_token: inner.token.clone(),
                has_more: false,
            }),
        }
    }

    async fn get_object(&self, id: &str, _with_content: bool) -> Result<RemoteObject> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ObjectNotFound(id.to_string()))
    }

    async fn get_object_by_path(&self, path: &str, _with_content: bool) -> Result<RemoteObject> {
        let inner = self.inner.lock().unwrap();
        let id = inner
            .ids_by_path
            .get(path)
            .ok_or_else(|| SyncError::ObjectNotFound(path.to_string()))?;
        Ok(inner.objects_by_id.get(id).expect("dangling path index").clone())
    }

    async fn get_children(&self, folder_id: &str) -> Result<Vec<RemoteObject>> {
        let inner = self.inner.lock().unwrap();
        let folder_path = if folder_id.is_empty() {
            String::new()
        } else {
            inner
                .objects_by_id
                .get(folder_id)
                .ok_or_else(|| SyncError::ObjectNotFound(folder_id.to_string()))?
                .path
                .clone()
        };
        let mut children: Vec<RemoteObject> = inner
            .objects_by_id
            .values()
            .filter(|obj| Self::is_direct_child(&folder_path, &obj.path))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    async fn create_document(
        &self,
        parent_path: &str,
        name: &str,
        content: &[u8],
    ) -> Result<RemoteObject> {
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_path, name)
        };
        let id = Uuid::new_v4().to_string();
        let object = RemoteObject {
            id: id.clone(),
            path: path.clone(),
            kind: ObjectKind::Document,
            checksum: None,
            mtime_ms: 0,
            size: content.len() as u64,
            content: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.ids_by_path.insert(path, id.clone());
        inner.contents.insert(id.clone(), content.to_vec());
        inner.objects_by_id.insert(id, object.clone());
        Ok(object)
    }

    async fn create_folder(&self, parent_path: &str, name: &str) -> Result<RemoteObject> {
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_path, name)
        };
        let id = Uuid::new_v4().to_string();
        let object = RemoteObject {
            id: id.clone(),
            path: path.clone(),
            kind: ObjectKind::Folder,
            checksum: None,
            mtime_ms: 0,
            size: 0,
            content: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.ids_by_path.insert(path, id.clone());
        inner.objects_by_id.insert(id, object.clone());
        Ok(object)
    }

    async fn delete_object(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let object = inner
            .objects_by_id
            .remove(id)
            .ok_or_else(|| SyncError::ObjectNotFound(id.to_string()))?;
        inner.ids_by_path.remove(&object.path);
        inner.contents.remove(id);
        Ok(())
    }

    async fn download_content(&self, id: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ObjectNotFound(id.to_string()))
    }

    async fn upload_content(&self, id: &str, content: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects_by_id.contains_key(id) {
            return Err(SyncError::ObjectNotFound(id.to_string()));
        }
        inner.contents.insert(id.to_string(), content.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_children_are_one_level_deep() {
        let session = InMemoryCmisSession::new();
        session.seed_object(
            RemoteObject {
                id: "f1".into(),
                path: "a".into(),
                kind: ObjectKind::Folder,
                checksum: None,
                mtime_ms: 0,
                size: 0,
                content: None,
            },
            None,
        );
        session.seed_object(
            RemoteObject {
                id: "d1".into(),
                path: "a/b.txt".into(),
                kind: ObjectKind::Document,
                checksum: Some("hash".into()),
                mtime_ms: 0,
                size: 10,
                content: None,
            },
            Some(vec![0u8; 10]),
        );
        let children = session.get_children("f1").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "a/b.txt");
    }

    #[tokio::test]
    async fn object_not_found_is_distinguishable() {
        let session = InMemoryCmisSession::new();
        let err = session.get_object_by_path("nope", false).await.unwrap_err();
        assert!(matches!(err, SyncError::ObjectNotFound(_)));
    }
}
