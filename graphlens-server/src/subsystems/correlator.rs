//! Request/response correlation strategies.
//!
//! Provides a `Correlator` trait with two implementations:
//! - **Relay**: responses arrive from the page interceptor with their body;
//!   a UUID is minted at receipt and request + completion are reported at once
//! - **Identifier**: native network hooks keyed by the platform request id;
//!   completion is reported once both HTTP completion and the body are in,
//!   whichever arrives last
//!
//! Exactly one strategy is active per coordinator, chosen from config.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use graphlens_core::config::CorrelationConfig;
use graphlens_core::operation::{extract_operation_name, OperationMeta};
use graphlens_core::{
    CapturedExchange, Completion, CorrelationStrategy, NetworkEvent, PanelMessage, RelayedResponse,
    RequestFailure, TabId, ANONYMOUS_OPERATION,
};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use super::exchange_store::ExchangeStore;

/// A notification addressed to one tab's panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tab_id: TabId,
    pub message: PanelMessage,
}

impl Delivery {
    pub fn new(tab_id: TabId, message: PanelMessage) -> Self {
        Self { tab_id, message }
    }
}

pub trait Correlator: Send {
    fn strategy(&self) -> CorrelationStrategy;

    fn on_relayed_response(
        &mut self,
        tab_id: TabId,
        _response: RelayedResponse,
        _now: Instant,
    ) -> Vec<Delivery> {
        tracing::debug!(tab_id, strategy = ?self.strategy(), "Ignoring relayed response");
        Vec::new()
    }

    fn on_network_event(&mut self, event: NetworkEvent, _now: Instant) -> Vec<Delivery> {
        tracing::debug!(
            request_id = %event.request_id(),
            strategy = ?self.strategy(),
            "Ignoring network event"
        );
        Vec::new()
    }

    /// Purge in-flight state older than the TTL. Returns how many entries went.
    fn sweep_expired(&mut self, _now: Instant) -> usize {
        0
    }

    fn in_flight(&self) -> usize {
        0
    }

    fn stored(&self) -> usize;
}

pub fn create_correlator(config: &CorrelationConfig) -> Box<dyn Correlator> {
    match config.strategy {
        CorrelationStrategy::Relay => Box::new(RelayCorrelator::new(config.store_capacity)),
        CorrelationStrategy::Identifier => Box::new(IdentifierCorrelator::new(
            config.store_capacity,
            config.in_flight_ttl(),
        )),
    }
}

// ============================================================================
// Relay strategy
// ============================================================================

pub struct RelayCorrelator {
    store: ExchangeStore,
}

impl RelayCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: ExchangeStore::new(capacity),
        }
    }

    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }
}

impl Correlator for RelayCorrelator {
    fn strategy(&self) -> CorrelationStrategy {
        CorrelationStrategy::Relay
    }

    fn on_relayed_response(
        &mut self,
        tab_id: TabId,
        response: RelayedResponse,
        _now: Instant,
    ) -> Vec<Delivery> {
        let mut exchange = CapturedExchange::pending(Uuid::new_v4().to_string(), tab_id, response.url);
        exchange.operation_name = match response.operation_name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => response
                .request_body
                .as_ref()
                .map(extract_operation_name)
                .unwrap_or_else(|| ANONYMOUS_OPERATION.to_string()),
        };
        exchange.query = response.query.unwrap_or_default();
        exchange.request_body = response.request_body;
        exchange.page_path = response.page_path;

        let request = exchange.clone();
        let completion = Completion::from_http(exchange.id.clone(), response.status)
            .with_response(response.body);
        if let Err(e) = exchange.complete(&completion) {
            tracing::warn!(error = %e, "Relayed exchange rejected its completion");
        }

        tracing::debug!(
            tab_id,
            request_id = %exchange.id,
            operation = %exchange.operation_name,
            status = exchange.status.as_str(),
            "Relayed exchange captured"
        );
        self.store.insert(exchange);

        vec![
            Delivery::new(tab_id, PanelMessage::GraphqlRequest(request)),
            Delivery::new(tab_id, PanelMessage::RequestCompleted(completion)),
        ]
    }

    fn stored(&self) -> usize {
        self.store.len()
    }
}

// ============================================================================
// Identifier strategy
// ============================================================================

struct RequestState {
    tab_id: TabId,
    started_at: DateTime<Utc>,
    observed_at: Instant,
    completed: Option<(u16, DateTime<Utc>)>,
}

struct ResponseState {
    status_code: Option<u16>,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    /// `Some(None)` once a body arrived that was not JSON.
    body: Option<Option<Value>>,
    observed_at: Instant,
}

impl ResponseState {
    fn new(now: Instant) -> Self {
        Self {
            status_code: None,
            headers: Vec::new(),
            content_type: None,
            body: None,
            observed_at: now,
        }
    }
}

pub struct IdentifierCorrelator {
    store: ExchangeStore,
    ttl: Duration,
    requests: HashMap<String, RequestState>,
    responses: HashMap<String, ResponseState>,
}

impl IdentifierCorrelator {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            store: ExchangeStore::new(capacity),
            ttl,
            requests: HashMap::new(),
            responses: HashMap::new(),
        }
    }

    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }

    /// Content type recorded for an in-flight request, if headers arrived.
    pub fn content_type(&self, request_id: &str) -> Option<&str> {
        self.responses
            .get(request_id)
            .and_then(|r| r.content_type.as_deref())
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    fn response_state(&mut self, request_id: &str, now: Instant) -> &mut ResponseState {
        self.responses
            .entry(request_id.to_string())
            .or_insert_with(|| ResponseState::new(now))
    }

    /// Send the completion if both halves are present.
    fn try_finish(&mut self, request_id: &str) -> Option<Delivery> {
        let (status_code, finished_at) = self.requests.get(request_id)?.completed?;
        self.responses.get(request_id)?.body.as_ref()?;

        let request = self.requests.remove(request_id)?;
        let response = self.responses.remove(request_id)?;
        let body = response.body.flatten();

        let duration = (finished_at - request.started_at).num_milliseconds().max(0) as u64;
        let completion = Completion::from_http(request_id, status_code)
            .with_duration(Some(duration))
            .with_response(body);

        if let Some(exchange) = self.store.get_mut(request_id) {
            if let Err(e) = exchange.complete(&completion) {
                tracing::debug!(request_id, error = %e, "Ignoring repeated completion");
                return None;
            }
        }

        tracing::debug!(
            tab_id = request.tab_id,
            request_id,
            status_code,
            duration_ms = duration,
            header_status = ?response.status_code,
            headers = response.headers.len(),
            content_type = response.content_type.as_deref().unwrap_or("-"),
            "Exchange completed"
        );
        Some(Delivery::new(
            request.tab_id,
            PanelMessage::RequestCompleted(completion),
        ))
    }
}

impl Correlator for IdentifierCorrelator {
    fn strategy(&self) -> CorrelationStrategy {
        CorrelationStrategy::Identifier
    }

    fn on_network_event(&mut self, event: NetworkEvent, now: Instant) -> Vec<Delivery> {
        match event {
            NetworkEvent::BeforeRequest {
                request_id,
                tab_id,
                url,
                timestamp,
                request_body,
                ..
            } => {
                if self.requests.contains_key(&request_id) {
                    tracing::debug!(request_id = %request_id, "Duplicate before-request ignored");
                    return Vec::new();
                }
                let meta = OperationMeta::from_raw_body(request_body.as_deref());
                let mut exchange = CapturedExchange::pending(request_id.clone(), tab_id, url);
                exchange.operation_name = meta.operation_name;
                exchange.query = meta.query;
                exchange.request_body = meta.request_body;
                exchange.timestamp = timestamp;

                self.requests.insert(
                    request_id,
                    RequestState {
                        tab_id,
                        started_at: timestamp,
                        observed_at: now,
                        completed: None,
                    },
                );
                self.store.insert(exchange.clone());
                vec![Delivery::new(tab_id, PanelMessage::GraphqlRequest(exchange))]
            }
            NetworkEvent::HeadersReceived {
                request_id,
                status_code,
                headers,
                ..
            } => {
                if !self.requests.contains_key(&request_id) {
                    return Vec::new();
                }
                let content_type = headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .map(|(_, value)| value.clone());
                let state = self.response_state(&request_id, now);
                state.status_code = Some(status_code);
                state.content_type = content_type;
                state.headers = headers;
                Vec::new()
            }
            NetworkEvent::ResponseBody {
                request_id, body, ..
            } => {
                if !self.requests.contains_key(&request_id) {
                    return Vec::new();
                }
                let parsed = serde_json::from_str::<Value>(&body).ok();
                self.response_state(&request_id, now).body = Some(parsed);
                self.try_finish(&request_id).into_iter().collect()
            }
            NetworkEvent::Completed {
                request_id,
                timestamp,
                status_code,
            } => {
                let Some(request) = self.requests.get_mut(&request_id) else {
                    return Vec::new();
                };
                if request.completed.is_some() {
                    return Vec::new();
                }
                request.completed = Some((status_code, timestamp));
                let delivery = self.try_finish(&request_id);
                if delivery.is_none() {
                    tracing::trace!(request_id = %request_id, "Completion waiting for body");
                }
                delivery.into_iter().collect()
            }
            NetworkEvent::ErrorOccurred {
                request_id, error, ..
            } => {
                let Some(request) = self.requests.remove(&request_id) else {
                    return Vec::new();
                };
                self.responses.remove(&request_id);
                if let Some(exchange) = self.store.get_mut(&request_id) {
                    if let Err(e) = exchange.fail(error.clone()) {
                        tracing::debug!(request_id = %request_id, error = %e, "Ignoring late failure");
                    }
                }
                tracing::debug!(tab_id = request.tab_id, request_id = %request_id, error = %error, "Transport failure");
                vec![Delivery::new(
                    request.tab_id,
                    PanelMessage::RequestError(RequestFailure {
                        id: request_id,
                        error,
                    }),
                )]
            }
        }
    }

    fn sweep_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.requests.len() + self.responses.len();
        self.requests
            .retain(|_, state| now.duration_since(state.observed_at) < ttl);
        let requests = &self.requests;
        self.responses.retain(|id, state| {
            requests.contains_key(id) && now.duration_since(state.observed_at) < ttl
        });
        before - (self.requests.len() + self.responses.len())
    }

    fn in_flight(&self) -> usize {
        self.requests.len()
    }

    fn stored(&self) -> usize {
        self.store.len()
    }
}
