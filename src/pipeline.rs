use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::assembler::Assembler;
use crate::changelog::{ChangeLogIngester, IngestOutcome};
use crate::cmis::CmisSession;
use crate::config::SyncConfig;
use crate::db::DbManager;
use crate::error::{Result, SyncError};
use crate::model::DependencyGraph;
use crate::processor::Processor;

/// Runs exactly one sync pass: change-log ingestion first, falling back to a
/// full crawl when the ingester escalates. The change-log path and the
/// crawler path are mutually exclusive within a single call, matching the
/// concurrency model's "one path is chosen" rule.
pub async fn run_once(
    session: Arc<dyn CmisSession>,
    db: DbManager,
    config: SyncConfig,
    local_root: PathBuf,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let dependencies = Arc::new(DependencyGraph::new());
    let ingester = ChangeLogIngester::new(
        session.clone(),
        db.clone(),
        config.clone(),
        dependencies.clone(),
        local_root.clone(),
    );

    match ingester.start().await? {
        IngestOutcome::Synced => {
            log::info!("local and server tokens match; nothing to do");
            Ok(())
        }
        IngestOutcome::Incremental { triplets, new_token } => {
            log::info!("change-log produced {} triplet(s)", triplets.len());
            run_changelog_mode(
                session,
                db,
                config,
                dependencies,
                local_root,
                cancel,
                triplets,
                new_token,
            )
            .await
        }
        IngestOutcome::EscalateToFull(reason) => {
            log::warn!("escalating to full crawl: {}", reason);
            run_crawl_mode(session, db, config, dependencies, local_root, cancel).await
        }
    }
}

async fn run_changelog_mode(
    session: Arc<dyn CmisSession>,
    db: DbManager,
    config: SyncConfig,
    dependencies: Arc<DependencyGraph>,
    local_root: PathBuf,
    cancel: Arc<AtomicBool>,
    triplets: Vec<crate::model::SyncTriplet>,
    new_token: String,
) -> Result<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(config.queue_capacity);

    let assembler = Assembler::new(db.clone(), config.clone(), dependencies.clone());
    let assemble_task = tokio::spawn(async move { assembler.assemble_changelog(triplets, tx).await });

    let processor = Processor::new(session, db.clone(), config, dependencies, local_root, cancel);
    let process_result = processor.run(rx).await;

    let assemble_result = assemble_task
        .await
        .map_err(|e| SyncError::TransportTransient(e.to_string()))?;
    assemble_result?;
    process_result?;

    if processor.had_failures() {
        log::warn!(
            "not advancing change-log token to {}: one or more triplets failed this run",
            new_token
        );
        return Ok(());
    }

    db.set_change_log_token(&new_token)?;
    log::info!("change-log sync completed, token advanced to {}", new_token);
    Ok(())
}

async fn run_crawl_mode(
    session: Arc<dyn CmisSession>,
    db: DbManager,
    config: SyncConfig,
    dependencies: Arc<DependencyGraph>,
    local_root: PathBuf,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    // Captured before the crawl runs so the persisted token reflects the
    // server state this crawl actually reconciled against.
    let server_token = session.get_change_log_token().await?;

    let (tx, rx) = tokio::sync::mpsc::channel(config.queue_capacity);

    let assembler = Assembler::new(db.clone(), config.clone(), dependencies.clone());
    let assemble_session = session.clone();
    let assemble_root = local_root.clone();
    let assemble_task =
        tokio::spawn(async move { assembler.assemble_crawl(assemble_root, assemble_session, tx).await });

    let processor = Processor::new(session, db.clone(), config, dependencies, local_root, cancel);
    let process_result = processor.run(rx).await;

    let assemble_result = assemble_task
        .await
        .map_err(|e| SyncError::TransportTransient(e.to_string()))?;
    assemble_result?;
    process_result?;

    if processor.had_failures() {
        log::warn!("not advancing change-log token: one or more triplets failed this run");
        return Ok(());
    }

    if let Some(token) = server_token {
        db.set_change_log_token(&token)?;
        log::info!("full crawl completed, token set to {}", token);
    } else {
        log::info!("full crawl completed, server reported no token");
    }
    Ok(())
}
