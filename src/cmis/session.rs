use async_trait::async_trait;

use crate::error::Result;
use crate::model::ObjectKind;

/// The kind of change a server-side object underwent since the last token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEventType {
    Created,
    Updated,
    Deleted,
    Security,
}

/// One entry of the server's change feed.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub object_id: String,
    pub event_type: ChangeEventType,
    /// Server timestamp in 100ns units, when the server provides one.
    pub timestamp_100ns: Option<i64>,
}

/// One page of `GetContentChanges`.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
    pub latest_token: Option<String>,
    pub has_more: bool,
}

/// A folder or document as reported by the server.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub id: String,
    pub path: String,
    pub kind: ObjectKind,
    pub checksum: Option<String>,
    pub mtime_ms: i64,
    pub size: u64,
    pub content: Option<Vec<u8>>,
}

/// The CMIS session contract. Concrete AtomPub/Browser-binding transports
/// implement this trait; the pipeline only depends on it, never on a wire
/// format. Boxed-future (`async_trait`) rather than native `async fn in trait`
/// keeps the trait object-safe so a session can be held behind an `Arc<dyn
/// CmisSession>`.
#[async_trait]
pub trait CmisSession: Send + Sync {
    async fn get_change_log_token(&self) -> Result<Option<String>>;

    async fn get_content_changes(
        &self,
        since_token: Option<&str>,
        include_properties: bool,
        max_items: u32,
    ) -> Result<ChangeBatch>;

    async fn get_object(&self, id: &str, with_content: bool) -> Result<RemoteObject>;

    async fn get_object_by_path(&self, path: &str, with_content: bool) -> Result<RemoteObject>;

    async fn get_children(&self, folder_id: &str) -> Result<Vec<RemoteObject>>;

    async fn create_document(
        &self,
        parent_path: &str,
        name: &str,
        content: &[u8],
    ) -> Result<RemoteObject>;

    async fn create_folder(&self, parent_path: &str, name: &str) -> Result<RemoteObject>;

    async fn delete_object(&self, id: &str) -> Result<()>;

    async fn download_content(&self, id: &str) -> Result<Vec<u8>>;

    async fn upload_content(&self, id: &str, content: &[u8]) -> Result<()>;
}
