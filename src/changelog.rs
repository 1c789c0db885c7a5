use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cmis::{ChangeEvent, ChangeEventType, CmisSession};
use crate::config::{DropFirstEventPerBatch, SyncConfig};
use crate::db::DbManager;
use crate::error::{Result, SyncError};
use crate::model::{DbView, DependencyGraph, DependencyOutcome, LocalView, ObjectKind, RemoteView, SyncTriplet};

/// What a change-log run produced.
pub enum IngestOutcome {
    /// Local and server tokens already matched; nothing to do.
    Synced,
    /// A finite batch of triplets ready for the assembler, plus the token to
    /// persist once the processor confirms every triplet succeeded.
    Incremental {
        triplets: Vec<SyncTriplet>,
        new_token: String,
    },
    /// The change feed is unusable for this run; caller must fall back to a
    /// crawler-driven full sync.
    EscalateToFull(String),
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

/// Legacy servers embed `/remote/path/` before the object id; only the
/// trailing segment is the real id.
fn strip_id_prefix(id: &str) -> &str {
    match id.rsplit_once('/') {
        Some((_, tail)) => tail,
        None => id,
    }
}

/// The parent folder key of a canonical item key, or `None` at the sync root.
fn parent_key_of(key: &str) -> Option<String> {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => Some(format!("{}/", parent)),
        None => None,
    }
}

struct CoalescingBuffer {
    events: HashMap<String, Vec<ChangeEvent>>,
}

impl CoalescingBuffer {
    fn new() -> Self {
        Self {
            events: HashMap::new(),
        }
    }

    fn insert(&mut self, event: ChangeEvent) {
        let list = self.events.entry(event.object_id.clone()).or_default();
        let previous_ts = list.last().and_then(|e| e.timestamp_100ns);
        if Self::should_coalesce(previous_ts, &event) {
            return;
        }
        list.push(event);
    }

    /// Suppresses an `Updated` event that lands within the coalesce window of
    /// the previous event for the same object. Events without a timestamp
    /// are always recorded, since elapsed time cannot be computed.
    fn should_coalesce(previous_ts: Option<i64>, event: &ChangeEvent) -> bool {
        if event.event_type != ChangeEventType::Updated {
            return false;
        }
        match (previous_ts, event.timestamp_100ns) {
            (Some(prev), Some(current)) => {
                (current - prev).abs() < SyncConfig::COALESCE_WINDOW_100NS
            }
            _ => false,
        }
    }
}

/// Translates the server's change feed since the last persisted token into a
/// set of triplets, or decides the feed is unusable and signals escalation.
pub struct ChangeLogIngester {
    session: Arc<dyn CmisSession>,
    db: DbManager,
    config: SyncConfig,
    dependencies: Arc<DependencyGraph>,
    local_root: PathBuf,
}

impl ChangeLogIngester {
    pub fn new(
        session: Arc<dyn CmisSession>,
        db: DbManager,
        config: SyncConfig,
        dependencies: Arc<DependencyGraph>,
        local_root: PathBuf,
    ) -> Self {
        Self {
            session,
            db,
            config,
            dependencies,
            local_root,
        }
    }

    pub async fn start(&self) -> Result<IngestOutcome> {
        let local_token = self.db.get_change_log_token()?;
        let server_token = self.session.get_change_log_token().await?;

        if local_token == server_token {
            return Ok(IngestOutcome::Synced);
        }
        if local_token.is_none() {
            return Ok(IngestOutcome::EscalateToFull("no prior token".to_string()));
        }

        match self.ingest_pages(local_token).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::ChangeLogUnsupported(reason)) => {
                Ok(IngestOutcome::EscalateToFull(reason))
            }
            Err(SyncError::TransportTransient(reason)) => {
                Ok(IngestOutcome::EscalateToFull(reason))
            }
            Err(other) => Err(other),
        }
    }

    async fn ingest_pages(&self, local_token: Option<String>) -> Result<IngestOutcome> {
        let mut buffer = CoalescingBuffer::new();
        let mut token_cursor = local_token;
        let mut latest_token: Option<String> = None;
        let mut page_index: u32 = 0;

        loop {
            let batch = self
                .session
                .get_content_changes(
                    token_cursor.as_deref(),
                    true,
                    self.config.max_changes_per_page,
                )
                .await?;

            let mut events = batch.events;
            let drop_first = match self.config.drop_first_event_per_batch {
                DropFirstEventPerBatch::Always => true,
                DropFirstEventPerBatch::NonFirstOnly => page_index > 0,
            };
            if drop_first && !events.is_empty() {
                events.remove(0);
            }
            for event in events {
                buffer.insert(event);
            }

            if batch.has_more && batch.latest_token.is_none() {
                return Err(SyncError::ChangeLogUnsupported(
                    "server too old".to_string(),
                ));
            }
            if batch.latest_token.is_some() {
                latest_token = batch.latest_token.clone();
            }
            token_cursor = batch.latest_token;
            page_index += 1;

            if !batch.has_more {
                break;
            }
        }

        self.dispatch(buffer, latest_token).await
    }

    async fn dispatch(
        &self,
        buffer: CoalescingBuffer,
        latest_token: Option<String>,
    ) -> Result<IngestOutcome> {
        let mut triplets = Vec::new();
        let mut tentative_parents: HashSet<String> = HashSet::new();
        let mut produced_keys: HashSet<String> = HashSet::new();

        for (raw_id, events) in buffer.events {
            let last = match events.last() {
                Some(e) => e,
                None => continue,
            };
            let id = strip_id_prefix(&raw_id).to_string();

            match last.event_type {
                ChangeEventType::Updated => {
                    return Err(SyncError::ChangeLogUnsupported(format!(
                        "update detected for {}",
                        id
                    )));
                }
                ChangeEventType::Created | ChangeEventType::Security => {
                    match self.session.get_object(&id, false).await {
                        Ok(object) => {
                            let is_folder = object.kind == ObjectKind::Folder;
                            let name = canonical_name(
                                &object.path,
                                is_folder,
                                self.config.ignore_if_same_lowercase_names,
                            );
                            let remote_view = RemoteView {
                                id: object.id.clone(),
                                remote_relative_path: object.path.clone(),
                                checksum: object.checksum.clone(),
                                mtime_ms: object.mtime_ms,
                                kind: object.kind,
                                size: object.size,
                            };
                            triplets.push(SyncTriplet::from_remote(name, is_folder, remote_view));
                        }
                        Err(SyncError::ObjectNotFound(_)) => continue,
                        Err(other) => return Err(other),
                    }
                }
                ChangeEventType::Deleted => {
                    let record = self.db.get_path_by_id(&id)?;
                    let (local_path, remote_id, kind) = match record {
                        Some(found) => found,
                        None => continue,
                    };
                    let is_folder = kind == ObjectKind::Folder;
                    let checksum = self.db.get_checksum(&local_path)?;
                    let db_view = DbView {
                        remote_id,
                        remote_relative_path: local_path.clone(),
                        checksum,
                        mtime_ms: last.timestamp_100ns.unwrap_or(0),
                        kind,
                    };
                    let mut triplet =
                        SyncTriplet::from_db(local_path.clone(), is_folder, db_view);
                    if let Some(local_view) = self.synthesize_local_view(&local_path) {
                        triplet.merge_local(local_view);
                    }

                    if let Some(parent) = parent_key_of(&local_path) {
                        self.dependencies.add(&parent, &local_path);
                        tentative_parents.insert(parent);
                    }
                    produced_keys.insert(local_path.clone());
                    triplets.push(triplet);
                }
            }
        }

        for parent in &tentative_parents {
            if !produced_keys.contains(parent) {
                self.dependencies.remove_all(parent, DependencyOutcome::Succeed);
            }
        }

        let new_token = latest_token
            .ok_or_else(|| SyncError::ChangeLogUnsupported("no token returned".to_string()))?;

        Ok(IngestOutcome::Incremental { triplets, new_token })
    }

    /// Best-effort stat of the on-disk file backing a deleted-on-server item,
    /// so the processor can see whether it still needs local deletion.
    fn synthesize_local_view(&self, relative_path: &str) -> Option<LocalView> {
        let absolute = self.local_root.join(relative_path);
        let metadata = std::fs::metadata(&absolute).ok()?;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Some(LocalView {
            absolute_path: absolute,
            relative_path: relative_path.to_string(),
            size: metadata.len(),
            mtime_ms,
            content_hash: None,
        })
    }
}
