use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use bookmark_sync::bookmark::{title_for_display, Bookmark};
use bookmark_sync::change::Change;
use bookmark_sync::config::SyncSettings;
use bookmark_sync::crypto::PassphraseCrypto;
use bookmark_sync::import::import_html_bookmarks;
use bookmark_sync::native::{ChromiumProfileHost, MemoryBookmarkHost, NativeAdapter, NativeBookmarkHost};
use bookmark_sync::platform::Platform;
use bookmark_sync::progress::{create_bookmark_progress_bar, finish_with_success, wait_for_job};
use bookmark_sync::remote::{FileRemoteStore, HttpRemoteStore, RemoteStore};
use bookmark_sync::scheduler::{start_backup_scheduler, write_backup, BackupSchedule};
use bookmark_sync::search::SearchQuery;
use bookmark_sync::store::{JsonFileStore, KeyValueStore, StoreKey};
use bookmark_sync::validator::validate_tree;
use bookmark_sync::{SyncEngine, SyncEngineOptions};

#[derive(Parser)]
#[command(name = "bookmark-sync")]
#[command(about = "Keeps browser bookmarks in step with an encrypted remote copy", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, default_value = ".bookmark-sync/settings.json")]
    config: PathBuf,

    /// Encryption passphrase
    #[arg(long, env = "BOOKMARK_SYNC_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the remote copy with the browser's bookmarks and enable sync
    Upload,

    /// Replace the browser's bookmarks with the remote copy
    Pull,

    /// Push a bookmark backup (JSON) as the new remote copy and write it to the browser
    Restore {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Save the bookmarks as JSON ("-" for stdout)
    Export {
        #[arg(short, long, default_value = "-")]
        output: String,
    },

    /// Search the synced bookmarks
    Search {
        /// Keywords (all must match)
        keywords: Vec<String>,

        /// Restrict to bookmarks whose url contains this text
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Suggest a completion for a partial word
    Lookahead {
        word: String,

        /// Only complete from tags
        #[arg(short, long)]
        tags_only: bool,

        /// Words not to suggest
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Apply recorded changes (JSON array) through the sync queue
    Replay {
        #[arg(short, long)]
        changes: PathBuf,
    },

    /// Import links from a browser's HTML bookmark export into Other bookmarks
    ImportHtml {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Check a bookmark tree for structural problems
    Validate {
        /// Tree to check (JSON); defaults to the current bookmarks
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show detailed validation report
        #[arg(short, long)]
        detailed: bool,
    },

    /// Print the size of the encrypted sync data
    Size,

    /// Back up bookmarks on a cron schedule
    Schedule {
        /// Cron expression (defaults to the configured backup_cron)
        #[arg(long)]
        cron: Option<String>,

        /// Write one backup now and exit
        #[arg(long)]
        once: bool,

        /// Run as daemon
        #[arg(short, long)]
        daemon: bool,
    },
}

struct Session {
    engine: SyncEngine,
    profile: Option<Arc<ChromiumProfileHost>>,
}

impl Session {
    fn backup_profile(&self) {
        info!("💾 Creating backups");
        if let Some(profile) = &self.profile {
            match profile.backup() {
                Ok(Some(path)) => info!("✅ Backup created: {:?}", path),
                Ok(None) => info!("No bookmarks file to back up yet"),
                Err(e) => warn!("⚠️  Failed to back up {:?}: {}", profile.path(), e),
            }
        }
    }
}

async fn open_session(settings: &SyncSettings, passphrase: Option<&str>) -> Result<Session> {
    let passphrase = passphrase
        .context("No passphrase given: use --passphrase or BOOKMARK_SYNC_PASSPHRASE")?;

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create {:?}", settings.data_dir))?;

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(settings.state_file())?);
    if store.get(StoreKey::SyncBookmarksToolbar).await?.is_none() {
        store
            .set(StoreKey::SyncBookmarksToolbar, Value::Bool(settings.sync_toolbar))
            .await?;
    }

    let remote: Arc<dyn RemoteStore> = match (&settings.service_url, &settings.sync_id) {
        (Some(url), Some(sync_id)) => {
            Arc::new(HttpRemoteStore::new(url, sync_id, settings.push_timeout())?)
        }
        _ => {
            let path = settings
                .remote_file
                .clone()
                .unwrap_or_else(|| settings.data_dir.join("remote.json"));
            info!("📁 Using file remote at {:?}", path);
            Arc::new(FileRemoteStore::new(path))
        }
    };

    let profile = match &settings.bookmarks_file {
        Some(path) if settings.platform == Platform::Firefox => {
            anyhow::bail!("Firefox profiles cannot be opened from {:?}; drive Firefox through its extension host", path)
        }
        Some(path) => Some(Arc::new(ChromiumProfileHost::open(path)?)),
        None => None,
    };
    let host: Arc<dyn NativeBookmarkHost> = match &profile {
        Some(profile) => profile.clone(),
        None => {
            warn!("⚠️  No bookmarks_file configured, using an in-memory bookmark store");
            Arc::new(MemoryBookmarkHost::new(settings.platform))
        }
    };

    let crypto = Arc::new(PassphraseCrypto::new(passphrase, settings.key_salt())?);
    let engine = SyncEngine::start(
        NativeAdapter::new(host, settings.platform),
        store,
        remote,
        crypto,
        SyncEngineOptions {
            push_timeout: settings.push_timeout(),
            max_records: settings.max_records,
        },
    )
    .await?;

    Ok(Session { engine, profile })
}

fn read_tree(path: &Path) -> Result<Vec<Bookmark>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("{:?} is not a bookmark tree", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = SyncSettings::load(&cli.config)?;
    let session = open_session(&settings, cli.passphrase.as_deref()).await?;
    let engine = &session.engine;

    match cli.command {
        Commands::Upload => {
            info!("📤 Uploading browser bookmarks...");
            wait_for_job(engine.upload()?, "Upload").await?;
        }

        Commands::Pull => {
            session.backup_profile();
            wait_for_job(engine.pull()?, "Pull").await?;
        }

        Commands::Restore { file } => {
            let tree = read_tree(&file)?;
            let report = validate_tree(&tree);
            if !report.is_valid() {
                println!("{}", report.format(false));
                anyhow::bail!("Refusing to restore an invalid tree from {:?}", file);
            }
            session.backup_profile();
            wait_for_job(engine.restore(tree)?, "Restore").await?;
        }

        Commands::Export { output } => {
            let bookmarks = engine.export_bookmarks().await?;
            let json = serde_json::to_string_pretty(&bookmarks)?;
            if output == "-" {
                println!("{}", json);
            } else {
                std::fs::write(&output, json).with_context(|| format!("Failed to write {}", output))?;
                info!("✅ Exported bookmarks to {}", output);
            }
        }

        Commands::Search { keywords, url } => {
            let results = engine.search(&SearchQuery { url, keywords }).await?;
            for result in &results {
                println!(
                    "{:>3}  {}  {}",
                    result.score,
                    title_for_display(&result.bookmark),
                    result.bookmark.url().unwrap_or_default()
                );
            }
            info!("📊 {} bookmarks found", results.len());
        }

        Commands::Lookahead { word, tags_only, exclude } => {
            match engine.lookahead(&word, tags_only, &exclude).await? {
                Some(lookahead) => println!("{}", lookahead.suggestion),
                None => info!("No suggestion for '{}'", word),
            }
        }

        Commands::Replay { changes } => {
            let content = std::fs::read_to_string(&changes)
                .with_context(|| format!("Failed to read {:?}", changes))?;
            let changes: Vec<Change> = serde_json::from_str(&content)?;

            let pb = create_bookmark_progress_bar(changes.len() as u64, "Applying changes");
            let handles = changes
                .into_iter()
                .map(|change| engine.submit(change))
                .collect::<bookmark_sync::Result<Vec<_>>>()?;

            let mut failed = 0;
            for handle in handles {
                let seq = handle.seq();
                if let Err(e) = handle.wait().await {
                    warn!("⚠️  Change #{} failed: {}", seq, e);
                    failed += 1;
                }
                pb.inc(1);
            }
            finish_with_success(&pb, "Changes applied");
            if failed > 0 {
                anyhow::bail!("{} changes failed", failed);
            }
        }

        Commands::ImportHtml { file } => {
            info!("📥 Importing bookmarks from: {:?}", file);
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let current = engine.export_bookmarks().await?;
            let (count, tree) = import_html_bookmarks(&html, &current)?;
            session.backup_profile();
            wait_for_job(engine.restore(tree)?, &format!("Import of {} bookmarks", count)).await?;
        }

        Commands::Validate { file, detailed } => {
            info!("🔍 Validating bookmarks...");
            let tree = match file {
                Some(path) => read_tree(&path)?,
                None => engine.export_bookmarks().await?,
            };
            println!("{}", validate_tree(&tree).format(detailed));
        }

        Commands::Size => {
            let size = engine.sync_size().await?;
            println!("{} bytes", size);
        }

        Commands::Schedule { cron, once, daemon } => {
            if once {
                write_backup(engine, &settings.backup_dir()).await?;
            } else {
                let cron = cron.unwrap_or_else(|| settings.backup_cron.clone());
                info!("⏰ Starting backup scheduler with cron: {}", cron);
                let config = BackupSchedule::new(cron, settings.backup_dir(), daemon);
                let Session { engine, .. } = session;
                let engine = Arc::new(engine);
                start_backup_scheduler(engine.clone(), config).await?;
                engine.shutdown().await;
                return Ok(());
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
