//! Fail-soft key-value persistence for enablement flags and check-in status

use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key holding the user's per-target enablement flags
pub const ENABLED_ITEMS_KEY: &str = "enabledItems";

/// Key holding the last known check-in result per target
pub const CHECKIN_STATUS_KEY: &str = "checkinStatus";

/// Target id -> enabled. Absent ids are enabled.
pub type EnablementMap = BTreeMap<String, bool>;

/// Target id -> last known check-in success
pub type StatusMap = BTreeMap<String, bool>;

/// Durable key-value store.
///
/// Neither operation fails: faults are logged, `load` degrades to an empty
/// map and `save` to a no-op.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Values for the requested keys; missing keys are omitted
    async fn load(&self, keys: &[&str]) -> Map<String, Value>;

    /// Merge `entries` into the stored document, replacing those keys
    async fn save(&self, entries: Map<String, Value>);
}

/// Decode a stored id -> bool map, dropping entries that aren't booleans
fn decode_flags(value: Option<&Value>) -> BTreeMap<String, bool> {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(id, flag)| flag.as_bool().map(|flag| (id.clone(), flag)))
                .collect()
        })
        .unwrap_or_default()
}

fn encode_flags(flags: &BTreeMap<String, bool>) -> Value {
    Value::Object(
        flags
            .iter()
            .map(|(id, flag)| (id.clone(), Value::Bool(*flag)))
            .collect(),
    )
}

pub async fn load_enabled(store: &dyn StateStore) -> EnablementMap {
    let stored = store.load(&[ENABLED_ITEMS_KEY]).await;
    decode_flags(stored.get(ENABLED_ITEMS_KEY))
}

pub async fn load_status(store: &dyn StateStore) -> StatusMap {
    let stored = store.load(&[CHECKIN_STATUS_KEY]).await;
    decode_flags(stored.get(CHECKIN_STATUS_KEY))
}

pub async fn save_enabled(store: &dyn StateStore, enabled: &EnablementMap) {
    let mut entries = Map::new();
    entries.insert(ENABLED_ITEMS_KEY.to_string(), encode_flags(enabled));
    store.save(entries).await;
}

pub async fn save_status(store: &dyn StateStore, status: &StatusMap) {
    let mut entries = Map::new();
    entries.insert(CHECKIN_STATUS_KEY.to_string(), encode_flags(status));
    store.save(entries).await;
}

/// In-process store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of the stored document
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, keys: &[&str]) -> Map<String, Value> {
        let entries = self.entries.read().await;
        keys.iter()
            .filter_map(|key| entries.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect()
    }

    async fn save(&self, entries: Map<String, Value>) {
        self.entries.write().await.extend(entries);
    }
}

/// Single JSON document on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-merge-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document; a missing file is empty
    async fn read_document(&self) -> Result<Map<String, Value>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(AgentError::Io(e)),
        };

        serde_json::from_slice::<Map<String, Value>>(&raw).map_err(AgentError::Json)
    }

    /// Write to a sibling temp file, then rename over the target
    async fn write_document(&self, document: &Map<String, Value>) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "state".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, keys: &[&str]) -> Map<String, Value> {
        match self.read_document().await {
            Ok(document) => keys
                .iter()
                .filter_map(|key| document.get(*key).map(|v| (key.to_string(), v.clone())))
                .collect(),
            Err(e) => {
                warn!("Failed to read state from {}: {}", self.path.display(), e);
                Map::new()
            }
        }
    }

    async fn save(&self, entries: Map<String, Value>) {
        let _guard = self.write_lock.lock().await;

        let mut document = match self.read_document().await {
            Ok(document) => document,
            Err(AgentError::Json(e)) => {
                warn!(
                    "Existing state at {} is not a JSON object, rewriting it: {}",
                    self.path.display(),
                    e
                );
                Map::new()
            }
            Err(e) => {
                warn!(
                    "Cannot read state at {}, leaving it untouched: {}",
                    self.path.display(),
                    e
                );
                return;
            }
        };
        document.extend(entries);

        match self.write_document(&document).await {
            Ok(()) => debug!("Saved state to {}", self.path.display()),
            Err(e) => warn!("Failed to save state to {}: {}", self.path.display(), e),
        }
    }
}
