//! Panel state: the newest-first exchange list, filters, grouping and stars.
//!
//! Messages from the coordinator update the list and the store. Rendering is
//! decoupled: every change marks the view dirty and `run_panel` renders at
//! most once per frame tick.

use std::collections::HashMap;
use std::time::Duration;

use futures::{Stream, StreamExt};
use graphlens_core::config::PanelConfig;
use graphlens_core::{CapturedExchange, Completion, PanelMessage, RequestFailure, Settings};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::error::StorageError;
use crate::filter::Filter;
use crate::grouping::group_key;
use crate::store::{HistoryPatch, RequestStore};

/// Exchanges sharing a group key.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    pub starred: bool,
    pub entries: Vec<CapturedExchange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelView {
    Flat(Vec<CapturedExchange>),
    Grouped(Vec<Group>),
}

impl PanelView {
    pub fn len(&self) -> usize {
        match self {
            PanelView::Flat(entries) => entries.len(),
            PanelView::Grouped(groups) => groups.iter().map(|g| g.entries.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Renderer: Send {
    fn render(&mut self, view: &PanelView);
}

pub struct PanelController {
    store: RequestStore,
    entries: Vec<CapturedExchange>,
    settings: Settings,
    filter: Filter,
    grouped: bool,
    dedupe_window: usize,
    dirty: bool,
}

impl PanelController {
    /// Load history and settings from the store.
    pub async fn load(store: RequestStore, config: &PanelConfig) -> Result<Self, StorageError> {
        let entries = store.read().await?;
        let settings = store.settings().await?;
        tracing::debug!(entries = entries.len(), "Panel loaded");
        Ok(Self {
            store,
            entries,
            settings,
            filter: Filter::default(),
            grouped: false,
            dedupe_window: config.dedupe_window,
            dirty: true,
        })
    }

    pub fn entries(&self) -> &[CapturedExchange] {
        &self.entries
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Apply every message of a (possibly batched) notification. A storage
    /// error does not stop the rest of the batch; the first one is returned.
    pub async fn handle(&mut self, message: PanelMessage) -> Result<(), StorageError> {
        let mut first_error = None;
        for message in message.into_singles() {
            let result = match message {
                PanelMessage::GraphqlRequest(exchange) => self.on_request(exchange).await,
                PanelMessage::RequestCompleted(completion) => self.on_completed(completion).await,
                PanelMessage::RequestError(failure) => self.on_error(failure).await,
                batch => {
                    tracing::debug!(kind = batch.type_name(), "Unexpected batch after expansion");
                    Ok(())
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Same document and variables as one of the most recent entries.
    fn is_duplicate(&self, exchange: &CapturedExchange) -> bool {
        self.entries
            .iter()
            .take(self.dedupe_window)
            .any(|e| e.query == exchange.query && e.variables() == exchange.variables())
    }

    async fn on_request(&mut self, exchange: CapturedExchange) -> Result<(), StorageError> {
        if self.is_duplicate(&exchange) {
            tracing::debug!(id = %exchange.id, operation = %exchange.operation_name, "Skipping duplicate request");
            return Ok(());
        }
        self.entries.insert(0, exchange.clone());
        self.entries.truncate(self.store.capacity());
        self.dirty = true;
        self.store.append(exchange).await
    }

    async fn on_completed(&mut self, completion: Completion) -> Result<(), StorageError> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == completion.id) else {
            tracing::debug!(id = %completion.id, "Completion for unknown request");
            return Ok(());
        };
        if let Err(e) = entry.complete(&completion) {
            tracing::debug!(error = %e, "Completion ignored");
            return Ok(());
        }
        self.dirty = true;
        let id = completion.id.clone();
        self.store
            .update(&id, HistoryPatch::Completed(completion))
            .await
            .map(|_| ())
    }

    async fn on_error(&mut self, failure: RequestFailure) -> Result<(), StorageError> {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == failure.id) else {
            return Ok(());
        };
        if let Err(e) = entry.fail(failure.error.clone()) {
            tracing::debug!(error = %e, "Failure ignored");
            return Ok(());
        }
        self.dirty = true;
        let RequestFailure { id, error } = failure;
        self.store
            .update(&id, HistoryPatch::Failed { error })
            .await
            .map(|_| ())
    }

    pub fn set_filter(&mut self, filter: Filter) {
        if self.filter != filter {
            self.filter = filter;
            self.dirty = true;
        }
    }

    pub fn set_grouped(&mut self, grouped: bool) {
        if self.grouped != grouped {
            self.grouped = grouped;
            self.dirty = true;
        }
    }

    /// Star or unstar a group and persist the choice. Returns the new state.
    pub async fn toggle_star(&mut self, group: &str) -> Result<bool, StorageError> {
        let starred = self.settings.toggle_star(group);
        self.dirty = true;
        self.store.save_settings(self.settings.clone()).await?;
        Ok(starred)
    }

    pub async fn clear(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        self.dirty = true;
        self.store.clear().await
    }

    pub fn view(&self) -> PanelView {
        let visible = self
            .entries
            .iter()
            .filter(|e| self.filter.matches(e))
            .cloned();
        if !self.grouped {
            return PanelView::Flat(visible.collect());
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<CapturedExchange>> = HashMap::new();
        for exchange in visible {
            let key = group_key(&exchange.operation_name);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(exchange);
        }

        // `order` is already most-recent-first; a stable sort keeps it within
        // the starred and unstarred partitions.
        let mut result: Vec<Group> = order
            .into_iter()
            .map(|key| Group {
                starred: self.settings.is_starred(&key),
                entries: groups.remove(&key).unwrap_or_default(),
                key,
            })
            .collect();
        result.sort_by_key(|g| !g.starred);
        PanelView::Grouped(result)
    }

    /// Render if anything changed since the last render.
    pub fn render_if_dirty(&mut self, renderer: &mut dyn Renderer) -> bool {
        if !self.dirty {
            return false;
        }
        renderer.render(&self.view());
        self.dirty = false;
        true
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.store.flush().await
    }
}

/// Apply incoming messages and render at most once per `frame_interval`,
/// until the stream ends or shutdown fires. Pending history is flushed on exit.
///
/// Storage failures are logged and never end the loop; the in-memory list
/// stays live.
pub async fn run_panel<S>(
    mut controller: PanelController,
    mut messages: S,
    renderer: &mut dyn Renderer,
    frame_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> PanelController
where
    S: Stream<Item = PanelMessage> + Unpin,
{
    let mut frame = tokio::time::interval(frame_interval);
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = messages.next() => match message {
                Some(message) => {
                    if let Err(e) = controller.handle(message).await {
                        tracing::error!("Failed to persist panel history: {}", e);
                    }
                }
                None => {
                    tracing::info!("Panel connection closed");
                    break;
                }
            },
            _ = frame.tick() => {
                controller.render_if_dirty(renderer);
            }
            _ = shutdown.recv() => break,
        }
    }

    controller.render_if_dirty(renderer);
    if let Err(e) = controller.flush().await {
        tracing::error!("Final history flush failed: {}", e);
    }
    controller
}
