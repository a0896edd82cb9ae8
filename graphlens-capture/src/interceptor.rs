//! Decorators over the page's network primitives.
//!
//! Each wrapper holds the original primitive captured at injection time and
//! always delegates to it with the untouched request. Capture is a side
//! effect on the way back: it never changes the returned response and never
//! fails the call.

use std::sync::Arc;

use async_trait::async_trait;
use graphlens_core::operation::{is_graphql_request, OperationMeta};

use crate::error::TransportError;
use crate::http::{Fetch, HttpRequest, HttpResponse, Xhr, XhrFactory};
use crate::page::{Page, PageEvent, PageEvents};

/// Wrap the page's primitives. Returns `false` if the page was already patched.
pub fn install_interceptor(page: &Page) -> bool {
    let events = page.events().clone();
    let installed = page.install(move |fetch, xhr| {
        let fetch: Arc<dyn Fetch> = Arc::new(InterceptedFetch::new(fetch, events.clone()));
        let xhr: Arc<dyn XhrFactory> = Arc::new(InterceptedXhrFactory::new(xhr, events));
        (fetch, xhr)
    });
    if installed {
        tracing::debug!(path = %page.path(), "Interceptor installed");
    }
    installed
}

fn capture(url: String, response: &HttpResponse, meta: OperationMeta) -> PageEvent {
    PageEvent {
        url,
        status: response.status,
        // Unparseable bodies are recorded as absent.
        body: serde_json::from_slice(&response.body).ok(),
        operation_name: meta.operation_name,
        query: meta.query,
        request_body: meta.request_body,
    }
}

pub struct InterceptedFetch {
    original: Arc<dyn Fetch>,
    events: PageEvents,
}

impl InterceptedFetch {
    pub fn new(original: Arc<dyn Fetch>, events: PageEvents) -> Self {
        Self { original, events }
    }
}

#[async_trait]
impl Fetch for InterceptedFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if !is_graphql_request(&request.url, request.body.as_deref()) {
            return self.original.fetch(request).await;
        }

        let url = request.url.clone();
        let meta = OperationMeta::from_raw_body(request.body.as_deref());
        let response = self.original.fetch(request).await?;

        let delivered = self.events.dispatch(capture(url, &response, meta));
        tracing::trace!(status = response.status, delivered, "fetch exchange captured");
        Ok(response)
    }
}

pub struct InterceptedXhr {
    original: Box<dyn Xhr>,
    url: Option<String>,
    events: PageEvents,
}

#[async_trait]
impl Xhr for InterceptedXhr {
    fn open(&mut self, method: &str, url: &str) {
        self.url = Some(url.to_string());
        self.original.open(method, url);
    }

    async fn send(&mut self, body: Option<String>) -> Result<HttpResponse, TransportError> {
        let url = match &self.url {
            Some(url) if is_graphql_request(url, body.as_deref()) => url.clone(),
            _ => return self.original.send(body).await,
        };

        let meta = OperationMeta::from_raw_body(body.as_deref());
        let response = self.original.send(body).await?;

        let delivered = self.events.dispatch(capture(url, &response, meta));
        tracing::trace!(status = response.status, delivered, "xhr exchange captured");
        Ok(response)
    }
}

pub struct InterceptedXhrFactory {
    original: Arc<dyn XhrFactory>,
    events: PageEvents,
}

impl InterceptedXhrFactory {
    pub fn new(original: Arc<dyn XhrFactory>, events: PageEvents) -> Self {
        Self { original, events }
    }
}

impl XhrFactory for InterceptedXhrFactory {
    fn create(&self) -> Box<dyn Xhr> {
        Box::new(InterceptedXhr {
            original: self.original.create(),
            url: None,
            events: self.events.clone(),
        })
    }
}
