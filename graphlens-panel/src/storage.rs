//! Key/value persistence backends for panel state.
//!
//! A backend stores whole JSON values under string keys (`history`,
//! `settings`). `set` takes several keys at once so a batched flush is one
//! write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::StorageError;

/// File name of the persisted state document inside the data directory.
pub const STATE_FILE: &str = "panel-state.json";

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Merge `updates` into the stored document in a single write.
    async fn set(&self, updates: HashMap<String, Value>) -> Result<(), StorageError>;
}

// ============================================================================
// FileStorage
// ============================================================================

/// One JSON object on disk, replaced atomically on every write.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(STATE_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>, StorageError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&raw)? {
            Value::Object(map) => Ok(map),
            other => Err(StorageError::Malformed {
                key: STATE_FILE.to_string(),
                reason: format!("expected an object, found {}", type_name(&other)),
            }),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    async fn set(&self, updates: HashMap<String, Value>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.extend(updates);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&Value::Object(document))?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Panel state written");
        Ok(())
    }
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// In-memory backend that counts writes.
#[derive(Default)]
pub struct MemoryStorage {
    values: StdMutex<HashMap<String, Value>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: impl Into<String>, value: Value) -> Self {
        let storage = Self::default();
        if let Ok(mut values) = storage.values.lock() {
            values.insert(key.into(), value);
        }
        storage
    }

    /// Number of `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.value(key))
    }

    async fn set(&self, updates: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StorageError::Malformed {
                key: "*".to_string(),
                reason: "memory storage lock poisoned".to_string(),
            })?;
        values.extend(updates);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
