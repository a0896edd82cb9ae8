//! Model of an inspected page: its network primitives, its document state,
//! and the page-level event bus the interceptor publishes on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use graphlens_core::RelayedResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::error::TransportError;
use crate::http::{Fetch, HttpRequest, HttpResponse, Xhr, XhrFactory};

/// Name of the page-level event carrying a completed exchange.
pub const GRAPHQL_RESPONSE_EVENT: &str = "__graphql_response";

const EVENT_CAPACITY: usize = 256;

/// Payload of a `__graphql_response` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    pub url: String,
    pub status: u16,
    pub body: Option<Value>,
    pub operation_name: String,
    pub query: String,
    pub request_body: Option<Value>,
}

impl PageEvent {
    pub fn into_relayed(self, page_path: Option<String>) -> RelayedResponse {
        RelayedResponse {
            url: self.url,
            status: self.status,
            body: self.body,
            operation_name: Some(self.operation_name),
            query: Some(self.query),
            request_body: self.request_body,
            page_path,
        }
    }
}

/// Handle for dispatching and listening to page events.
#[derive(Clone)]
pub struct PageEvents {
    tx: broadcast::Sender<PageEvent>,
}

impl PageEvents {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Dispatch to every current listener. Returns how many received it.
    pub fn dispatch(&self, event: PageEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Page {
    path: RwLock<String>,
    events: PageEvents,
    document: watch::Sender<bool>,
    fetch: RwLock<Arc<dyn Fetch>>,
    xhr: RwLock<Arc<dyn XhrFactory>>,
    injected: AtomicBool,
}

impl Page {
    /// A page whose document element already exists.
    pub fn new(path: impl Into<String>, fetch: Arc<dyn Fetch>, xhr: Arc<dyn XhrFactory>) -> Self {
        Self::with_document(path, fetch, xhr, true)
    }

    /// A page still loading: no document element until [`Page::mark_dom_ready`].
    pub fn loading(path: impl Into<String>, fetch: Arc<dyn Fetch>, xhr: Arc<dyn XhrFactory>) -> Self {
        Self::with_document(path, fetch, xhr, false)
    }

    fn with_document(
        path: impl Into<String>,
        fetch: Arc<dyn Fetch>,
        xhr: Arc<dyn XhrFactory>,
        ready: bool,
    ) -> Self {
        let (document, _) = watch::channel(ready);
        Self {
            path: RwLock::new(path.into()),
            events: PageEvents::new(),
            document,
            fetch: RwLock::new(fetch),
            xhr: RwLock::new(xhr),
            injected: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &PageEvents {
        &self.events
    }

    pub fn path(&self) -> String {
        self.path.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn navigate(&self, path: impl Into<String>) {
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = path.into();
    }

    pub fn has_document_element(&self) -> bool {
        *self.document.borrow()
    }

    pub fn mark_dom_ready(&self) {
        self.document.send_replace(true);
    }

    /// Resolves once the document element exists.
    pub async fn dom_ready(&self) {
        let mut rx = self.document.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_injected(&self) -> bool {
        self.injected.load(Ordering::Acquire)
    }

    /// Page code calling `fetch(...)`.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let fetch = self.fetch.read().unwrap_or_else(PoisonError::into_inner).clone();
        fetch.fetch(request).await
    }

    /// Page code calling `new XMLHttpRequest()`.
    pub fn xhr(&self) -> Box<dyn Xhr> {
        self.xhr.read().unwrap_or_else(PoisonError::into_inner).create()
    }

    /// Replace both primitives with wrappers built from the current ones.
    /// Runs at most once per page; returns `false` if already installed.
    pub(crate) fn install<F>(&self, wrap: F) -> bool
    where
        F: FnOnce(Arc<dyn Fetch>, Arc<dyn XhrFactory>) -> (Arc<dyn Fetch>, Arc<dyn XhrFactory>),
    {
        if self.injected.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut fetch = self.fetch.write().unwrap_or_else(PoisonError::into_inner);
        let mut xhr = self.xhr.write().unwrap_or_else(PoisonError::into_inner);
        let (wrapped_fetch, wrapped_xhr) = wrap(fetch.clone(), xhr.clone());
        *fetch = wrapped_fetch;
        *xhr = wrapped_xhr;
        true
    }
}
