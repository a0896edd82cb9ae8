//! Request history and settings with cached reads and batched writes.
//!
//! Reads are served from an in-memory cache after the first load. Every
//! mutation schedules a write: the `max_batch_size`-th pending write flushes
//! at once, otherwise a single delayed flush fires `batch_delay` after the
//! first pending write. A flush writes every dirty key in one backend call.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use graphlens_core::config::HistoryConfig;
use graphlens_core::models::TransitionError;
use graphlens_core::{CapturedExchange, Completion, Settings};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::StorageError;
use crate::storage::StorageBackend;

pub const HISTORY_KEY: &str = "history";
pub const SETTINGS_KEY: &str = "settings";

/// Outcome to merge into a stored exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryPatch {
    Completed(Completion),
    Failed { error: String },
}

#[derive(Default)]
struct StoreState {
    history: Option<VecDeque<CapturedExchange>>,
    settings: Option<Settings>,
    dirty: BTreeSet<&'static str>,
    pending: usize,
    timer: Option<JoinHandle<()>>,
}

struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    capacity: usize,
    max_batch_size: usize,
    batch_delay: Duration,
    state: Mutex<StoreState>,
}

#[derive(Clone)]
pub struct RequestStore {
    inner: Arc<StoreInner>,
}

impl RequestStore {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &HistoryConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                capacity: config.capacity.max(1),
                max_batch_size: config.max_batch_size.max(1),
                batch_delay: config.batch_delay(),
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Prepend an exchange, evicting the oldest beyond capacity.
    pub async fn append(&self, exchange: CapturedExchange) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().await;
        let capacity = self.inner.capacity;
        let history = self.inner.history(&mut state).await?;
        history.push_front(exchange);
        history.truncate(capacity);
        self.schedule_write(&mut state, HISTORY_KEY).await
    }

    /// Merge an outcome into the stored exchange with `id`. Returns whether
    /// anything changed.
    pub async fn update(&self, id: &str, patch: HistoryPatch) -> Result<bool, StorageError> {
        let mut state = self.inner.state.lock().await;
        let history = self.inner.history(&mut state).await?;
        let Some(exchange) = history.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        let applied: Result<(), TransitionError> = match patch {
            HistoryPatch::Completed(completion) => exchange.complete(&completion),
            HistoryPatch::Failed { error } => exchange.fail(error),
        };
        if let Err(e) = applied {
            tracing::debug!(id, error = %e, "History entry left unchanged");
            return Ok(false);
        }
        self.schedule_write(&mut state, HISTORY_KEY).await?;
        Ok(true)
    }

    /// Full history, newest first.
    pub async fn read(&self) -> Result<Vec<CapturedExchange>, StorageError> {
        let mut state = self.inner.state.lock().await;
        let history = self.inner.history(&mut state).await?;
        Ok(history.iter().cloned().collect())
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().await;
        state.history = Some(VecDeque::new());
        self.schedule_write(&mut state, HISTORY_KEY).await
    }

    pub async fn settings(&self) -> Result<Settings, StorageError> {
        let mut state = self.inner.state.lock().await;
        Ok(self.inner.settings(&mut state).await?.clone())
    }

    pub async fn save_settings(&self, settings: Settings) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().await;
        state.settings = Some(settings);
        self.schedule_write(&mut state, SETTINGS_KEY).await
    }

    /// Write everything pending now.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let mut state = self.inner.state.lock().await;
        self.inner.flush_locked(&mut state).await
    }

    /// Maximum number of history entries kept.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub async fn pending_writes(&self) -> usize {
        self.inner.state.lock().await.pending
    }

    async fn schedule_write(
        &self,
        state: &mut StoreState,
        key: &'static str,
    ) -> Result<(), StorageError> {
        state.dirty.insert(key);
        state.pending += 1;

        if state.pending >= self.inner.max_batch_size {
            return self.inner.flush_locked(state).await;
        }

        if state.timer.is_none() {
            let inner = Arc::clone(&self.inner);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.batch_delay).await;
                let mut state = inner.state.lock().await;
                // Detach before flushing so the flush does not abort this task.
                state.timer = None;
                if let Err(e) = inner.flush_locked(&mut state).await {
                    tracing::error!("Delayed history flush failed: {}", e);
                }
            }));
        }
        Ok(())
    }
}

impl StoreInner {
    async fn history<'a>(
        &self,
        state: &'a mut StoreState,
    ) -> Result<&'a mut VecDeque<CapturedExchange>, StorageError> {
        if state.history.is_none() {
            let loaded: VecDeque<CapturedExchange> =
                load_key(self.backend.as_ref(), HISTORY_KEY).await?.unwrap_or_default();
            tracing::debug!(entries = loaded.len(), "History loaded");
            state.history = Some(loaded);
        }
        Ok(state.history.get_or_insert_with(VecDeque::new))
    }

    async fn settings<'a>(&self, state: &'a mut StoreState) -> Result<&'a Settings, StorageError> {
        if state.settings.is_none() {
            let loaded: Settings = load_key(self.backend.as_ref(), SETTINGS_KEY)
                .await?
                .unwrap_or_default();
            state.settings = Some(loaded);
        }
        Ok(state.settings.get_or_insert_with(Settings::default))
    }

    async fn flush_locked(&self, state: &mut StoreState) -> Result<(), StorageError> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.dirty.is_empty() {
            state.pending = 0;
            return Ok(());
        }

        let mut updates = HashMap::new();
        for key in std::mem::take(&mut state.dirty) {
            let value = match key {
                HISTORY_KEY => match &state.history {
                    Some(history) => serde_json::to_value(history)?,
                    None => Value::Array(Vec::new()),
                },
                _ => serde_json::to_value(state.settings.clone().unwrap_or_default())?,
            };
            updates.insert(key.to_string(), value);
        }
        let writes = state.pending;
        state.pending = 0;

        self.backend.set(updates).await?;
        tracing::debug!(writes, "Flushed panel state");
        Ok(())
    }
}

async fn load_key<T: serde::de::DeserializeOwned>(
    backend: &dyn StorageBackend,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match backend.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Malformed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use graphlens_core::{ExchangeStatus, Theme};
    use serde_json::json;

    fn exchange(id: &str) -> CapturedExchange {
        CapturedExchange::pending(id, 1, "https://api.test/graphql")
    }

    fn store_with(backend: Arc<MemoryStorage>) -> RequestStore {
        RequestStore::new(backend, &HistoryConfig::default())
    }

    // ========================================================================
    // Write batching
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_rapid_appends_share_one_delayed_write() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        for i in 0..9 {
            store.append(exchange(&format!("e{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(backend.writes(), 0, "nothing written before the delay");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(backend.writes(), 1);
        let persisted = backend.value(HISTORY_KEY).unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 9);
        assert_eq!(persisted[0]["id"], "e8", "newest first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_threshold_flushes_immediately() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        for i in 0..10 {
            store.append(exchange(&format!("e{i}"))).await.unwrap();
        }
        assert_eq!(backend.writes(), 1, "tenth write flushes without waiting");
        assert_eq!(store.pending_writes().await, 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.writes(), 1, "superseded timer must not write again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_and_history_flush_together() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());
        store.append(exchange("a")).await.unwrap();
        store
            .save_settings(Settings {
                theme: Theme::Dark,
                starred_groups: vec!["get user".to_string()],
            })
            .await
            .unwrap();
        store.flush().await.unwrap();

        assert_eq!(backend.writes(), 1);
        assert_eq!(backend.value(SETTINGS_KEY).unwrap()["theme"], "dark");
        assert_eq!(backend.value(HISTORY_KEY).unwrap()[0]["id"], "a");
    }

    // ========================================================================
    // Cache and capacity
    // ========================================================================

    #[tokio::test]
    async fn test_capacity_evicts_exactly_the_oldest() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend);
        for i in 0..1000 {
            store.append(exchange(&format!("e{i}"))).await.unwrap();
        }
        assert_eq!(store.read().await.unwrap().len(), 1000);

        store.append(exchange("e1000")).await.unwrap();
        let history = store.read().await.unwrap();
        assert_eq!(history.len(), 1000);
        assert_eq!(history[0].id, "e1000");
        assert_eq!(history[999].id, "e1");
    }

    #[tokio::test]
    async fn test_first_read_loads_then_serves_cache() {
        let stored = vec![exchange("old")];
        let backend = Arc::new(MemoryStorage::with_value(
            HISTORY_KEY,
            serde_json::to_value(&stored).unwrap(),
        ));
        let store = store_with(backend.clone());
        assert_eq!(store.read().await.unwrap()[0].id, "old");

        backend
            .set(HashMap::from([(HISTORY_KEY.to_string(), json!([]))]))
            .await
            .unwrap();
        assert_eq!(store.read().await.unwrap().len(), 1, "served from cache");
    }

    #[tokio::test]
    async fn test_settings_default_when_absent() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        let settings = store.settings().await.unwrap();
        assert_eq!(settings.theme, Theme::Light);
        assert!(settings.starred_groups.is_empty());
    }

    #[tokio::test]
    async fn test_update_is_guarded() {
        let store = store_with(Arc::new(MemoryStorage::new()));
        store.append(exchange("a")).await.unwrap();

        let done = Completion::from_http("a", 200).with_response(Some(json!({"data": 1})));
        assert!(store.update("a", HistoryPatch::Completed(done)).await.unwrap());

        let again = Completion::from_http("a", 500);
        assert!(!store.update("a", HistoryPatch::Completed(again)).await.unwrap());
        assert!(!store
            .update("a", HistoryPatch::Failed { error: "late".to_string() })
            .await
            .unwrap());
        assert!(!store
            .update("missing", HistoryPatch::Failed { error: "x".to_string() })
            .await
            .unwrap());

        let entry = &store.read().await.unwrap()[0];
        assert_eq!(entry.status, ExchangeStatus::Success);
        assert_eq!(entry.response, Some(json!({"data": 1})));
    }

    #[tokio::test]
    async fn test_clear_empties_cache_and_storage() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());
        store.append(exchange("a")).await.unwrap();
        store.clear().await.unwrap();
        store.flush().await.unwrap();
        assert!(store.read().await.unwrap().is_empty());
        assert_eq!(backend.value(HISTORY_KEY), Some(json!([])));
    }
}
