use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::store::write_atomically;
use crate::sync::SyncEngine;

pub struct BackupSchedule {
    pub cron_expression: String,
    pub backup_dir: PathBuf,
    pub daemon: bool,
}

impl BackupSchedule {
    pub fn new(cron: String, backup_dir: PathBuf, daemon: bool) -> Self {
        Self {
            cron_expression: cron,
            backup_dir,
            daemon,
        }
    }
}

/// Exports the bookmarks to `bookmarks-<timestamp>.json` in `dir`.
pub async fn write_backup(engine: &SyncEngine, dir: &Path) -> crate::error::Result<PathBuf> {
    let bookmarks = engine.export_bookmarks().await?;
    let content = serde_json::to_string_pretty(&bookmarks)?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("bookmarks-{}.json", Utc::now().format("%Y%m%d-%H%M%S%.3f")));
    write_atomically(&path, content.as_bytes()).await?;

    info!("💾 Backed up {} containers to {:?}", bookmarks.len(), path);
    Ok(path)
}

pub async fn start_backup_scheduler(engine: Arc<SyncEngine>, config: BackupSchedule) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    info!("⏰ Backup scheduler initialized with cron: {}", config.cron_expression);

    let backup_dir = config.backup_dir.clone();
    let job = Job::new_async(config.cron_expression.as_str(), move |_uuid, _l| {
        let engine = engine.clone();
        let backup_dir = backup_dir.clone();
        Box::pin(async move {
            info!("🔄 Scheduled backup triggered");
            if let Err(e) = write_backup(&engine, &backup_dir).await {
                error!("❌ Scheduled backup failed: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    if config.daemon {
        info!("🔄 Running as daemon. Press Ctrl+C to stop.");
    } else {
        info!("⏰ Scheduler started. Keeping process alive...");
    }
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down scheduler...");

    scheduler.shutdown().await?;
    Ok(())
}
