use std::path::Path;
use std::sync::mpsc::{channel, Receiver};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Result, SyncError};

/// One raw filesystem activity notification. Debouncing/coalescing these into
/// a decision to start a sync pass is external policy (§1); this adapter only
/// forwards what `notify` reports.
#[derive(Debug, Clone)]
pub struct FileActivity {
    pub paths: Vec<std::path::PathBuf>,
}

impl From<Event> for FileActivity {
    fn from(event: Event) -> Self {
        Self { paths: event.paths }
    }
}

/// Thin adapter over `notify` satisfying the filesystem-watcher contract: it
/// watches a root recursively and exposes raw activity on a channel, nothing
/// more.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<FileActivity>,
}

impl LocalWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        let (tx, events) = channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(FileActivity::from(event));
            }
        })
        .map_err(|e| SyncError::TransportTransient(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::TransportTransient(e.to_string()))?;

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Blocks until the next activity batch or the watcher is dropped.
    pub fn recv(&self) -> Option<FileActivity> {
        self.events.recv().ok()
    }
}
