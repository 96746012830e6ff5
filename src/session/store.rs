//! Durable storage for the session key identifier.
//!
//! Only the address is persisted; balances and flags are always re-derived
//! from the chain. The file layout is a JSON object keyed by storage key so
//! several tools can share one state file:
//!
//! ```json
//! { "ten-session-key-state": { "sessionKey": "0x…" } }
//! ```
//!
//! Writes are last-writer-wins. Each save goes to a temporary file in the
//! same directory which is then renamed over the state file, so a crash
//! mid-write leaves the previous contents intact.

use alloy::primitives::Address;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence seam for the session key identifier.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Address>, StoreError>;

    /// Persist `session_key`; `None` clears the entry.
    fn save(&self, session_key: Option<Address>) -> Result<(), StoreError>;
}

/// Non-durable store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Address>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(session_key: Address) -> Self {
        Self {
            inner: Mutex::new(Some(session_key)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<Address>, StoreError> {
        Ok(*self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, session_key: Option<Address>) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = session_key;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    session_key: Option<Address>,
}

/// JSON-file store holding one entry of a shared state file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    storage_key: String,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>, storage_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            storage_key: storage_key.into(),
        }
    }

    fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read this store's entry, `None` when absent.
    pub(crate) fn load_entry<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let all = self.read_all()?;
        all.get(&self.storage_key)
            .map(|entry| serde_json::from_value(entry.clone()))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Replace this store's entry, or remove it with `None`. Other entries are kept.
    pub(crate) fn save_entry<T: Serialize>(&self, entry: Option<&T>) -> Result<(), StoreError> {
        let mut all = self.read_all()?;
        match entry {
            Some(entry) => {
                all.insert(self.storage_key.clone(), serde_json::to_value(entry)?);
            }
            None => {
                all.remove(&self.storage_key);
            }
        }

        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &all)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<Address>, StoreError> {
        let persisted: Option<PersistedSession> = self.load_entry()?;
        let session_key = persisted.and_then(|p| p.session_key);
        tracing::debug!(path = %self.path.display(), ?session_key, "Loaded session state");
        Ok(session_key)
    }

    fn save(&self, session_key: Option<Address>) -> Result<(), StoreError> {
        let entry = session_key.map(|session_key| PersistedSession {
            session_key: Some(session_key),
        });
        self.save_entry(entry.as_ref())?;
        tracing::debug!(path = %self.path.display(), ?session_key, "Saved session state");
        Ok(())
    }
}
