use std::time::Duration;

/// Policy for the change-log `drop first event of batch` de-duplication quirk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropFirstEventPerBatch {
    /// Drop the first event of every page, including the first page of a run.
    Always,
    /// Drop the first event of every page except the very first one.
    NonFirstOnly,
}

/// Frozen configuration injected into every pipeline component.
///
/// There is no global/thread-local config; callers construct one value and pass
/// it (or an `Arc` of it) down to crawlers, the ingester, the assembler and the
/// processor.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub max_changes_per_page: u32,
    pub ignore_if_same_lowercase_names: bool,
    pub poll_interval: Duration,
    pub sync_at_startup: bool,
    pub coalesce_window: Duration,
    pub drop_first_event_per_batch: DropFirstEventPerBatch,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_changes_per_page: 50,
            ignore_if_same_lowercase_names: false,
            poll_interval: Duration::from_secs(30),
            sync_at_startup: true,
            coalesce_window: Duration::from_millis(500),
            drop_first_event_per_batch: DropFirstEventPerBatch::Always,
            worker_count,
            queue_capacity: worker_count * 4,
        }
    }
}

impl SyncConfig {
    /// Coalescing threshold in 100ns file-time units, matching the server's
    /// native timestamp resolution.
    pub const COALESCE_WINDOW_100NS: i64 = 5_000_000;

    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("CMIS_SYNC_MAX_CHANGES_PER_PAGE") {
            if let Ok(n) = val.parse() {
                config.max_changes_per_page = n;
            }
        }
        if let Ok(val) = std::env::var("CMIS_SYNC_IGNORE_SAME_LOWERCASE") {
            config.ignore_if_same_lowercase_names = val == "1" || val == "true";
        }
        config
    }
}
