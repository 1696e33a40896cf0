//! File-backed history store.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use peerchat_protocol::{HistoryLog, Message, engine_records};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::{StoreError, StoreResult};

/// History file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// History file. Relative paths are resolved against the data directory.
    pub file: Option<String>,
    /// Start every run from an empty history.
    pub reset_on_start: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: None,
            reset_on_start: true,
        }
    }
}

/// What a read of the backing file found.
#[derive(Debug)]
enum Persisted {
    Missing,
    Unreadable(String),
    Log(HistoryLog),
}

/// Serialized access to the persisted message log.
///
/// The file is written in the chat engine's record layout so the engine can
/// keep appending to it; any fields the engine adds are carried through.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted log.
    ///
    /// Returns `None` when the file is missing or cannot be decoded.
    pub async fn load(&self) -> Option<HistoryLog> {
        let _guard = self.lock.lock().await;
        match self.read_unlocked().await {
            Persisted::Log(log) => Some(log),
            Persisted::Missing | Persisted::Unreadable(_) => None,
        }
    }

    /// Read the persisted log, treating "no history" as an empty log.
    pub async fn load_or_empty(&self) -> HistoryLog {
        self.load().await.unwrap_or_default()
    }

    /// Atomically replace the persisted log.
    pub async fn save(&self, log: &[Message]) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        self.write_unlocked(log).await
    }

    /// Append one message and persist. Returns the new log length.
    ///
    /// A missing file starts a new log. An existing file that cannot be read
    /// is left untouched and reported as [`StoreError::Unreadable`].
    pub async fn append(&self, message: Message) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let mut log = match self.read_unlocked().await {
            Persisted::Log(log) => log,
            Persisted::Missing => HistoryLog::new(),
            Persisted::Unreadable(reason) => {
                return Err(StoreError::Unreadable {
                    path: self.path.clone(),
                    reason,
                });
            }
        };
        log.push(message);
        self.write_unlocked(&log).await?;
        Ok(log.len())
    }

    /// Persist an empty log.
    pub async fn clear(&self) -> StoreResult<()> {
        self.save(&[]).await
    }

    async fn read_unlocked(&self) -> Persisted {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history file at {}", self.path.display());
                return Persisted::Missing;
            }
            Err(e) => {
                warn!("Failed to read history at {}: {}", self.path.display(), e);
                return Persisted::Unreadable(e.to_string());
            }
        };

        match serde_json::from_slice::<HistoryLog>(&bytes) {
            Ok(log) => Persisted::Log(log),
            Err(e) => {
                warn!(
                    "Ignoring unparsable history at {}: {}",
                    self.path.display(),
                    e
                );
                Persisted::Unreadable(e.to_string())
            }
        }
    }

    async fn write_unlocked(&self, log: &[Message]) -> StoreResult<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StoreError::InvalidPath(self.path.clone()))?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;

        let body = serde_json::to_vec_pretty(&engine_records(log))?;

        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = parent.join(format!(
            ".{}.tmp-{}-{}",
            file_name.to_string_lossy(),
            std::process::id(),
            nonce
        ));

        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&self.path, e));
        }

        debug!(
            "Wrote {} messages ({} bytes) to {}",
            log.len(),
            body.len(),
            self.path.display()
        );
        Ok(())
    }
}
