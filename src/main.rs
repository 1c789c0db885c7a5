use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cmis_sync_core::cmis::InMemoryCmisSession;
use cmis_sync_core::config::SyncConfig;
use cmis_sync_core::db::DbManager;
use cmis_sync_core::pipeline;

/// Binary entry point: loads configuration, opens the sync database,
/// constructs a session, and runs one pipeline pass.
///
/// No concrete CMIS transport ships with this crate (the wire format is an
/// external collaborator, §1); this binary wires up the in-memory test
/// double so the pipeline is runnable end to end. A real deployment swaps
/// `InMemoryCmisSession` for an `Arc<dyn CmisSession>` backed by an
/// AtomPub/Browser-binding client.
#[tokio::main]
async fn main() {
    env_logger::init();

    let config = SyncConfig::from_env_or_default();
    let local_root: PathBuf = std::env::var("CMIS_SYNC_LOCAL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().expect("failed to read current directory"));

    let db = match DbManager::new() {
        Ok(db) => db,
        Err(e) => {
            log::error!("failed to open sync database: {}", e);
            std::process::exit(1);
        }
    };

    log::warn!("no concrete CMIS transport configured; running against an in-memory stub session");
    let session = Arc::new(InMemoryCmisSession::new());
    let cancel = Arc::new(AtomicBool::new(false));

    match pipeline::run_once(session, db, config, local_root, cancel).await {
        Ok(()) => {
            println!("sync pass completed successfully");
        }
        Err(e) => {
            log::error!("sync pass failed: {}", e);
            println!("sync pass failed: {}", e);
            std::process::exit(1);
        }
    }
}
