// # File Settings Source
//
// File-based implementation of SettingsSource with crash recovery.
//
// ## Purpose
//
// Persists the static addressing settings across daemon restarts. The
// daemon reloads the file on SIGHUP so administrators can edit it in place.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good settings
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "settings": {
//     "use_static_ip": "1",
//     "static_ip": "192.168.1.20",
//     "static_gateway": "192.168.1.1",
//     "static_netmask": "255.255.255.0",
//     "static_dns1": "192.168.1.1"
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

use crate::Error;
use crate::state::StaticSettings;
use crate::traits::SettingsSource;

/// Settings file format version
const SETTINGS_FILE_VERSION: &str = "1.0";

/// File-based settings source with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use ethlink_core::settings::FileSettingsSource;
/// use ethlink_core::traits::SettingsSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let source = FileSettingsSource::new("/var/lib/ethlink/settings.json").await?;
///
///     // Atomically written to disk, then published to watchers
///     source.set("use_static_ip", Some("0".to_string())).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileSettingsSource {
    path: PathBuf,
    published: Arc<watch::Sender<StaticSettings>>,
    // Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

/// Serializable settings file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SettingsFileFormat {
    version: String,
    #[serde(default)]
    settings: StaticSettings,
}

impl FileSettingsSource {
    /// Create or load a file settings source
    ///
    /// This will:
    /// 1. Try to load the existing settings file
    /// 2. If corruption is detected, try to load from backup
    /// 3. If both fail, start with empty settings
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create settings directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let settings = Self::load_with_recovery(&path).await?;
        let (tx, _rx) = watch::channel(settings);

        Ok(Self {
            path,
            published: Arc::new(tx),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the settings file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish its contents
    ///
    /// Watchers are notified even if nothing changed; the settings watcher
    /// filters out immaterial updates.
    pub async fn reload(&self) -> Result<StaticSettings, Error> {
        let _guard = self.write_lock.lock().await;
        let settings = Self::load_with_recovery(&self.path).await?;
        self.published.send_replace(settings.clone());
        tracing::info!("Reloaded settings from {}", self.path.display());
        Ok(settings)
    }

    /// Load settings with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load the main file
    /// 2. If it does not parse, try the backup
    /// 3. If the backup also fails, start with empty settings
    async fn load_with_recovery(path: &Path) -> Result<StaticSettings, Error> {
        match Self::load(path).await {
            Ok(settings) => Ok(settings),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Settings file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty settings.");
                    return Ok(StaticSettings::default());
                }

                match Self::load(&backup_path).await {
                    Ok(settings) => {
                        tracing::info!("Recovered settings from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore settings file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(settings)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty settings.",
                            backup_err
                        );
                        Ok(StaticSettings::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<StaticSettings, Error> {
        if !path.exists() {
            tracing::debug!("Settings file does not exist: {}", path.display());
            return Ok(StaticSettings::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::settings(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: SettingsFileFormat = serde_json::from_str(&content)?;

        if file.version != SETTINGS_FILE_VERSION {
            tracing::warn!(
                "Settings file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                SETTINGS_FILE_VERSION,
                file.version
            );
        }

        Ok(file.settings)
    }

    /// Write settings to the file atomically
    async fn write(&self, settings: &StaticSettings) -> Result<(), Error> {
        let file = SettingsFileFormat {
            version: SETTINGS_FILE_VERSION.to_string(),
            settings: settings.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::settings(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await?;
            temp.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::settings(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Settings written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl SettingsSource for FileSettingsSource {
    async fn current(&self) -> Result<StaticSettings, Error> {
        Ok(self.published.borrow().clone())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = StaticSettings> + Send + 'static>> {
        Box::pin(WatchStream::from_changes(self.published.subscribe()))
    }

    async fn set(&self, key: &str, value: Option<String>) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.published.borrow().clone();
        updated.set(key, value)?;

        // Durable before visible
        self.write(&updated).await?;
        self.published.send_replace(updated);
        Ok(())
    }
}
