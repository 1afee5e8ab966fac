use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::platform::Platform;
use crate::queue::DEFAULT_MAX_RECORDS;

/// Settings read from `settings.json` in the data directory.
///
/// Every field has a default so a partial file is fine. The passphrase is
/// never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub platform: Platform,

    /// Where local state (`state.json`) and default backups live.
    pub data_dir: PathBuf,

    /// The browser profile's `Bookmarks` file (Chromium family).
    pub bookmarks_file: Option<PathBuf>,

    /// Remote bookmark service; used together with `sync_id`.
    pub service_url: Option<String>,

    /// Also salts the encryption key.
    pub sync_id: Option<String>,

    /// A file standing in for the remote service when no URL is set.
    pub remote_file: Option<PathBuf>,

    pub push_timeout_secs: u64,

    /// Six-field cron expression (seconds first) for automatic backups.
    pub backup_cron: String,

    pub backup_dir: Option<PathBuf>,

    /// Finished changes kept for inspection.
    pub max_records: usize,

    /// Initial value of the toolbar sync flag for new installs.
    pub sync_toolbar: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            data_dir: PathBuf::from(".bookmark-sync"),
            bookmarks_file: None,
            service_url: None,
            sync_id: None,
            remote_file: None,
            push_timeout_secs: 30,
            backup_cron: "0 0 */6 * * *".to_string(),
            backup_dir: None,
            max_records: DEFAULT_MAX_RECORDS,
            sync_toolbar: true,
        }
    }
}

impl SyncSettings {
    /// Reads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| SyncError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;

        info!("📋 Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.push_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig("push_timeout_secs must be positive".into()));
        }

        let fields = self.backup_cron.split_whitespace().count();
        if fields == 0 {
            return Err(SyncError::InvalidConfig("backup_cron must not be empty".into()));
        }
        if !(6..=7).contains(&fields) {
            return Err(SyncError::InvalidConfig(format!(
                "backup_cron needs 6 or 7 fields, got {}: '{}'",
                fields, self.backup_cron
            )));
        }

        if self.max_records == 0 {
            return Err(SyncError::InvalidConfig("max_records must be positive".into()));
        }
        if self.service_url.is_some() && self.sync_id.is_none() {
            return Err(SyncError::InvalidConfig("service_url requires a sync_id".into()));
        }
        Ok(())
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    /// Salt for key derivation.
    pub fn key_salt(&self) -> &str {
        self.sync_id.as_deref().unwrap_or("bookmark-sync")
    }
}
