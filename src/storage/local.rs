//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── execution_meta.json   # Execution ledger
//! └── {topic}.json          # Seen listings, one file per topic
//! ```
//!
//! Every write goes to a temp file first and is renamed into place, so a
//! reader sees either the old or the new content. After each successful
//! write the work signal marker is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::config::{LEDGER_FILE_STEM, PathsConfig};
use crate::models::{ExecutionLedger, StateEncoding, TopicState};
use crate::storage::{LedgerStore, StateStore};

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    work_signal: Option<PathBuf>,
    /// Serializes ledger read-modify-write cycles between concurrent topics
    ledger_lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            work_signal: None,
            ledger_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a LocalStorage from the configured paths, with the work signal enabled.
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.data_dir).with_work_signal(&paths.work_signal)
    }

    /// Touch `path` whenever persisted state changes.
    pub fn with_work_signal(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_signal = Some(path.into());
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn state_key(topic: &str) -> String {
        format!("{topic}.json")
    }

    fn ledger_key() -> String {
        format!("{LEDGER_FILE_STEM}.json")
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Touch the work signal marker, if configured.
    async fn signal_change(&self) -> Result<()> {
        if let Some(signal) = &self.work_signal {
            self.ensure_dir(signal).await?;
            tokio::fs::write(signal, b"").await?;
            log::debug!("Work signal written to {}", signal.display());
        }
        Ok(())
    }

    fn state_io(&self, key: &str, error: impl std::fmt::Display) -> AppError {
        AppError::state_io(self.path(key).display().to_string(), error)
    }

    /// Read a topic's state without initializing a missing file.
    pub async fn peek(&self, topic: &str) -> Result<Option<TopicState>> {
        let key = Self::state_key(topic);
        match self.read_bytes(&key).await {
            Ok(Some(bytes)) => TopicState::decode(&bytes)
                .map(|(state, _)| Some(state))
                .map_err(|e| self.state_io(&key, e)),
            Ok(None) => Ok(None),
            Err(e) => Err(self.state_io(&key, e)),
        }
    }
}

#[async_trait]
impl StateStore for LocalStorage {
    async fn load(&self, topic: &str) -> Result<TopicState> {
        let key = Self::state_key(topic);
        match self.read_bytes(&key).await {
            Ok(Some(bytes)) => {
                let (state, encoding) =
                    TopicState::decode(&bytes).map_err(|e| self.state_io(&key, e))?;
                if encoding == StateEncoding::Legacy {
                    log::info!("Migrating {key} from legacy array format to map format");
                }
                Ok(state)
            }
            Ok(None) => {
                log::info!("No state for \"{topic}\" yet, initializing {key}");
                let state = TopicState::default();
                self.save(topic, &state).await?;
                Ok(state)
            }
            Err(e) => Err(self.state_io(&key, e)),
        }
    }

    async fn save(&self, topic: &str, state: &TopicState) -> Result<()> {
        let key = Self::state_key(topic);
        let bytes = state.encode().map_err(|e| self.state_io(&key, e))?;
        self.write_bytes(&key, &bytes)
            .await
            .map_err(|e| self.state_io(&key, e))?;
        log::debug!("Saved {} listings to {}", state.len(), key);

        self.signal_change()
            .await
            .map_err(|e| self.state_io(&key, e))
    }
}

#[async_trait]
impl LedgerStore for LocalStorage {
    async fn load_ledger(&self) -> Result<ExecutionLedger> {
        let key = Self::ledger_key();
        match self.read_bytes(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(ledger) => Ok(ledger),
                Err(e) => {
                    log::warn!("Ledger {key} is unreadable ({e}); starting from an empty ledger");
                    Ok(ExecutionLedger::default())
                }
            },
            Ok(None) => Ok(ExecutionLedger::default()),
            Err(e) => Err(self.state_io(&key, e)),
        }
    }

    async fn record(&self, topic: &str, at: DateTime<Utc>, success: bool) -> Result<()> {
        let _guard = self.ledger_lock.lock().await;
        let key = Self::ledger_key();

        let mut ledger = self.load_ledger().await?;
        ledger.record(topic, at, success);

        let bytes = serde_json::to_vec_pretty(&ledger).map_err(|e| self.state_io(&key, e))?;
        self.write_bytes(&key, &bytes)
            .await
            .map_err(|e| self.state_io(&key, e))?;

        self.signal_change()
            .await
            .map_err(|e| self.state_io(&key, e))
    }
}
