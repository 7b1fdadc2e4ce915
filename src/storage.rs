//! Durable key/value storage for session preferences and login history.
//!
//! Mirrors a browser local store: string keys, string values, absent keys are
//! not an error. Callers fall back to defaults on any read problem.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::{RealtimeError, RealtimeResult};

pub const KEY_AUTO_RECONNECT: &str = "auto_reconnect";
pub const KEY_LOGIN_HISTORY: &str = "login_history";

pub trait LocalStorage: Send + Sync + 'static {
    fn get(&self, key: &str) -> RealtimeResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RealtimeResult<()>;
    fn remove(&self, key: &str) -> RealtimeResult<()>;
}

pub type SharedStorage = Arc<dyn LocalStorage>;

fn storage_err(key: &str, error: impl ToString) -> RealtimeError {
    RealtimeError::Storage {
        key: key.to_string(),
        error: error.to_string(),
    }
}

/// Read a boolean preference; missing or unreadable values yield `None`.
pub fn read_bool(storage: &dyn LocalStorage, key: &str) -> Option<bool> {
    match storage.get(key) {
        Ok(Some(raw)) => match raw.trim() {
            "true" => Some(true),
            "false" => Some(false),
            other => {
                tracing::warn!(key, value = other, "ignoring unparseable stored flag");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "storage read failed; using default");
            None
        }
    }
}

pub fn write_bool(storage: &dyn LocalStorage, key: &str, value: bool) {
    if let Err(e) = storage.set(key, if value { "true" } else { "false" }) {
        tracing::warn!(key, error = %e, "failed to persist preference");
    }
}

/// In-process storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> RealtimeResult<Option<String>> {
        let entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RealtimeResult<()> {
        let mut entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> RealtimeResult<()> {
        let mut entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        entries.remove(key);
        Ok(())
    }
}

/// One JSON object per file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open `path`, starting empty when the file is missing or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match sonic_rs::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt storage file; starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable storage file; starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, key: &str, entries: &BTreeMap<String, String>) -> RealtimeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage_err(key, e))?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path).map_err(|e| storage_err(key, e))?;
            let mut writer = BufWriter::new(file);
            let body = sonic_rs::to_string(entries).map_err(|e| storage_err(key, e))?;
            writer
                .write_all(body.as_bytes())
                .map_err(|e| storage_err(key, e))?;
            writer.flush().map_err(|e| storage_err(key, e))?;
            writer.get_ref().sync_all().map_err(|e| storage_err(key, e))?;
        }
        fs::rename(&temp_path, &self.path).map_err(|e| storage_err(key, e))
    }
}

impl LocalStorage for FileStorage {
    fn get(&self, key: &str) -> RealtimeResult<Option<String>> {
        let entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> RealtimeResult<()> {
        let mut entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        entries.insert(key.to_string(), value.to_string());
        self.flush(key, &entries)
    }

    fn remove(&self, key: &str) -> RealtimeResult<()> {
        let mut entries = self.entries.lock().map_err(|e| storage_err(key, e))?;
        if entries.remove(key).is_some() {
            self.flush(key, &entries)?;
        }
        Ok(())
    }
}
