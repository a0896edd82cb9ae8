//! Background coordinator: the single owner of per-tab routing state.
//!
//! Holds the tab → panel connection map, the active correlator, the rate
//! limiter and the batcher. Every handler runs on one actor task
//! (`run_coordinator`), fed through an mpsc command channel, so the maps are
//! consistent between commands.

use std::collections::HashMap;
use std::time::Duration;

use graphlens_core::operation::is_graphql_request;
use graphlens_core::{
    CorrelationStrategy, Envelope, LensConfig, NetworkEvent, PanelMessage, RelayedResponse, TabId,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use super::batcher::Batcher;
use super::correlator::{create_correlator, Correlator, Delivery};
use super::rate_limit::RateLimiter;
use crate::router;

/// Outgoing half of a panel connection.
pub type PanelPort = mpsc::UnboundedSender<PanelMessage>;

/// Identifies one registration of a panel, so a stale disconnect can be told
/// apart from the current connection of the same tab.
pub type ConnectionId = u64;

const COMMAND_BUFFER: usize = 1024;

struct PanelConnection {
    id: ConnectionId,
    port: PanelPort,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub strategy: &'static str,
    pub connections: usize,
    pub in_flight: usize,
    pub stored: usize,
    pub dropped: u64,
    pub queued: usize,
}

pub struct Coordinator {
    correlator: Box<dyn Correlator>,
    limiter: Option<RateLimiter>,
    batcher: Option<Batcher>,
    connections: HashMap<TabId, PanelConnection>,
    next_connection: ConnectionId,
    dropped: u64,
    sweep_interval: Duration,
}

impl Coordinator {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            correlator: create_correlator(&config.correlation),
            limiter: RateLimiter::from_config(&config.rate_limit),
            batcher: Batcher::from_config(&config.batching),
            connections: HashMap::new(),
            next_connection: 1,
            dropped: 0,
            sweep_interval: config.correlation.sweep_interval(),
        }
    }

    pub fn strategy(&self) -> CorrelationStrategy {
        self.correlator.strategy()
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn is_connected(&self, tab_id: TabId) -> bool {
        self.connections.contains_key(&tab_id)
    }

    // ========================================================================
    // Panel connections
    // ========================================================================

    pub fn connect(&mut self, tab_id: TabId, port: PanelPort) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection += 1;
        if let Some(previous) = self.connections.insert(tab_id, PanelConnection { id, port }) {
            tracing::debug!(tab_id, previous = previous.id, connection = id, "Panel connection replaced");
        } else {
            tracing::info!(tab_id, connection = id, "Panel connected");
        }
        id
    }

    /// Returns false when `connection` is no longer the tab's registration.
    pub fn disconnect(&mut self, tab_id: TabId, connection: ConnectionId) -> bool {
        match self.connections.get(&tab_id) {
            Some(current) if current.id == connection => {}
            _ => {
                tracing::debug!(tab_id, connection, "Ignoring stale panel disconnect");
                return false;
            }
        }
        self.connections.remove(&tab_id);
        if let Some(batcher) = self.batcher.as_mut() {
            let discarded = batcher.discard(tab_id);
            if discarded > 0 {
                tracing::debug!(tab_id, discarded, "Discarded queued notifications");
            }
        }
        tracing::info!(tab_id, connection, "Panel disconnected");
        true
    }

    // ========================================================================
    // Capture events
    // ========================================================================

    pub fn on_relayed_response(&mut self, tab_id: TabId, response: RelayedResponse, now: Instant) {
        if !self.admit(tab_id, now) {
            return;
        }
        let deliveries = self.correlator.on_relayed_response(tab_id, response, now);
        self.dispatch(deliveries, now);
    }

    pub fn on_network_event(&mut self, event: NetworkEvent, now: Instant) {
        if let NetworkEvent::BeforeRequest {
            tab_id,
            url,
            request_body,
            ..
        } = &event
        {
            if !is_graphql_request(url, request_body.as_deref()) {
                return;
            }
            if !self.admit(*tab_id, now) {
                return;
            }
        }
        let deliveries = self.correlator.on_network_event(event, now);
        self.dispatch(deliveries, now);
    }

    fn admit(&mut self, tab_id: TabId, now: Instant) -> bool {
        let Some(limiter) = self.limiter.as_mut() else {
            return true;
        };
        if limiter.check(tab_id, now) {
            return true;
        }
        self.dropped += 1;
        tracing::warn!(tab_id, dropped = self.dropped, "Rate limit exceeded, dropping event");
        false
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn dispatch(&mut self, deliveries: Vec<Delivery>, now: Instant) {
        for Delivery { tab_id, message } in deliveries {
            if !self.is_connected(tab_id) {
                tracing::trace!(tab_id, kind = message.type_name(), "No panel for tab");
                continue;
            }
            match self.batcher.as_mut() {
                Some(batcher) => batcher.enqueue(tab_id, message, now),
                None => self.send(tab_id, message),
            }
        }
    }

    /// Deliver to a tab's current panel, if it has one.
    pub fn send(&mut self, tab_id: TabId, message: PanelMessage) {
        let Some(connection) = self.connections.get(&tab_id) else {
            return;
        };
        if connection.port.send(message).is_err() {
            let id = connection.id;
            self.connections.remove(&tab_id);
            tracing::debug!(tab_id, connection = id, "Panel port closed, registration removed");
        }
    }

    pub fn next_flush(&self) -> Option<Instant> {
        self.batcher.as_ref().and_then(Batcher::deadline)
    }

    pub fn flush_due(&mut self, now: Instant) {
        if self.batcher.as_ref().is_some_and(|b| b.is_due(now)) {
            self.flush_all();
        }
    }

    pub fn flush_all(&mut self) {
        let Some(batcher) = self.batcher.as_mut() else {
            return;
        };
        for (tab_id, messages) in batcher.drain() {
            for message in messages {
                self.send(tab_id, message);
            }
        }
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    pub fn sweep(&mut self, now: Instant) {
        let purged = self.correlator.sweep_expired(now);
        if purged > 0 {
            tracing::info!(purged, "Purged stale in-flight state");
        }
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.prune(now);
        }
        self.connections.retain(|tab_id, connection| {
            let open = !connection.port.is_closed();
            if !open {
                tracing::debug!(tab_id, connection = connection.id, "Dropping closed panel port");
            }
            open
        });
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            strategy: match self.strategy() {
                CorrelationStrategy::Relay => "relay",
                CorrelationStrategy::Identifier => "identifier",
            },
            connections: self.connections.len(),
            in_flight: self.correlator.in_flight(),
            stored: self.correlator.stored(),
            dropped: self.dropped,
            queued: self.batcher.as_ref().map(Batcher::pending).unwrap_or(0),
        }
    }

    fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Connect { tab_id, port, reply } => {
                let id = self.connect(tab_id, port);
                let _ = reply.send(id);
            }
            Command::Disconnect { tab_id, connection } => {
                self.disconnect(tab_id, connection);
            }
            Command::Submit(envelope) => router::route_envelope(self, envelope, now),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

pub enum Command {
    Connect {
        tab_id: TabId,
        port: PanelPort,
        reply: oneshot::Sender<ConnectionId>,
    },
    Disconnect {
        tab_id: TabId,
        connection: ConnectionId,
    },
    Submit(Envelope),
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("coordinator is not running")]
pub struct CoordinatorStopped;

/// Cloneable entry point to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub async fn connect(
        &self,
        tab_id: TabId,
        port: PanelPort,
    ) -> Result<ConnectionId, CoordinatorStopped> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { tab_id, port, reply }).await?;
        rx.await.map_err(|_| CoordinatorStopped)
    }

    pub async fn disconnect(
        &self,
        tab_id: TabId,
        connection: ConnectionId,
    ) -> Result<(), CoordinatorStopped> {
        self.command(Command::Disconnect { tab_id, connection }).await
    }

    pub async fn submit(&self, envelope: Envelope) -> Result<(), CoordinatorStopped> {
        self.command(Command::Submit(envelope)).await
    }

    pub async fn stats(&self) -> Result<CoordinatorStats, CoordinatorStopped> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Stats { reply }).await?;
        rx.await.map_err(|_| CoordinatorStopped)
    }

    async fn command(&self, command: Command) -> Result<(), CoordinatorStopped> {
        self.tx.send(command).await.map_err(|_| CoordinatorStopped)
    }
}

/// Drive a coordinator until shutdown or until every handle is dropped.
/// Queued notifications are flushed on the way out.
pub async fn run_coordinator(
    mut coordinator: Coordinator,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut sweep = tokio::time::interval(coordinator.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.tick().await;

    tracing::info!(strategy = ?coordinator.strategy(), "Coordinator started");

    loop {
        let deadline = coordinator.next_flush();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => coordinator.handle_command(command, Instant::now()),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                coordinator.flush_due(Instant::now());
            }
            _ = sweep.tick() => coordinator.sweep(Instant::now()),
            _ = shutdown.recv() => {
                tracing::info!("Coordinator shutting down");
                break;
            }
        }
    }

    coordinator.flush_all();
}

pub fn spawn_coordinator(
    config: &LensConfig,
    shutdown: broadcast::Receiver<()>,
) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let coordinator = Coordinator::new(config);
    let task = tokio::spawn(run_coordinator(coordinator, rx, shutdown));
    (CoordinatorHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graphlens_core::{ExchangeStatus, RuntimeMessage};
    use serde_json::json;

    fn config(strategy: CorrelationStrategy, batching: bool) -> LensConfig {
        let mut config = LensConfig::default();
        config.correlation.strategy = strategy;
        config.batching.enabled = batching;
        config
    }

    fn relayed(query: &str) -> RelayedResponse {
        RelayedResponse {
            url: "https://api.test/graphql".to_string(),
            status: 200,
            body: Some(json!({"data": {}})),
            operation_name: None,
            query: Some(query.to_string()),
            request_body: Some(json!({ "query": query })),
            page_path: None,
        }
    }

    fn before(id: &str, url: &str, body: Option<&str>) -> NetworkEvent {
        NetworkEvent::BeforeRequest {
            request_id: id.to_string(),
            tab_id: 7,
            url: url.to_string(),
            method: "POST".to_string(),
            timestamp: Utc::now(),
            request_body: body.map(str::to_string),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PanelMessage>) -> Vec<PanelMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    #[test]
    fn test_notification_without_panel_is_skipped() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Identifier, false));
        let now = Instant::now();
        coordinator.on_network_event(before("r1", "https://api.test/graphql", Some(r#"{"query":"{a}"}"#)), now);
        coordinator.send(99, PanelMessage::RequestError(graphlens_core::RequestFailure {
            id: "r1".to_string(),
            error: "boom".to_string(),
        }));

        let stats = coordinator.stats();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.in_flight, 1, "correlation state untouched by a missing panel");
        assert_eq!(stats.stored, 1);
    }

    #[test]
    fn test_newer_connection_replaces_older() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Relay, false));
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let old = coordinator.connect(3, old_tx);
        let new = coordinator.connect(3, new_tx);
        assert_ne!(old, new);

        coordinator.on_relayed_response(3, relayed("query Q{q}"), Instant::now());
        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(drain(&mut new_rx).len(), 2);

        assert!(!coordinator.disconnect(3, old), "stale disconnect must not evict");
        assert!(coordinator.is_connected(3));
        assert!(coordinator.disconnect(3, new));
        assert!(!coordinator.is_connected(3));
    }

    #[test]
    fn test_closed_port_is_unregistered_on_send() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Relay, false));
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator.connect(3, tx);
        drop(rx);
        coordinator.on_relayed_response(3, relayed("query Q{q}"), Instant::now());
        assert!(!coordinator.is_connected(3));
        assert_eq!(coordinator.stats().stored, 1, "capture continues without a panel");
    }

    // ------------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------------

    #[test]
    fn test_non_graphql_traffic_never_captured() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Identifier, false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(7, tx);
        coordinator.on_network_event(
            before("r1", "https://api.test/users", Some(r#"{"name":"x"}"#)),
            Instant::now(),
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coordinator.stats().in_flight, 0);
    }

    #[test]
    fn test_rate_limit_drops_excess() {
        let mut config = config(CorrelationStrategy::Relay, false);
        config.rate_limit.max_requests = 2;
        let mut coordinator = Coordinator::new(&config);
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(3, tx);

        let now = Instant::now();
        for _ in 0..3 {
            coordinator.on_relayed_response(3, relayed("query Q{q}"), now);
        }
        assert_eq!(drain(&mut rx).len(), 4);
        assert_eq!(coordinator.stats().dropped, 1);

        coordinator.on_relayed_response(3, relayed("query Q{q}"), now + Duration::from_secs(1));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_reconnecting_panel_keeps_rate_window() {
        let mut config = config(CorrelationStrategy::Relay, false);
        config.rate_limit.max_requests = 2;
        let mut coordinator = Coordinator::new(&config);
        let now = Instant::now();

        let (tx, _rx) = mpsc::unbounded_channel();
        let first = coordinator.connect(3, tx);
        coordinator.on_relayed_response(3, relayed("query Q{q}"), now);
        coordinator.on_relayed_response(3, relayed("query Q{q}"), now);
        assert!(coordinator.disconnect(3, first));

        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(3, tx);
        coordinator.on_relayed_response(3, relayed("query Q{q}"), now);
        assert!(drain(&mut rx).is_empty(), "budget spent before the reconnect still applies");
        assert_eq!(coordinator.stats().dropped, 1);
    }

    #[test]
    fn test_identifier_flow_out_of_order() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Identifier, false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(7, tx);
        let now = Instant::now();

        coordinator.on_network_event(before("r1", "https://api.test/graphql", Some(r#"{"query":"query A{x}"}"#)), now);
        coordinator.on_network_event(
            NetworkEvent::Completed {
                request_id: "r1".to_string(),
                timestamp: Utc::now(),
                status_code: 200,
            },
            now,
        );
        coordinator.on_network_event(
            NetworkEvent::ResponseBody {
                request_id: "r1".to_string(),
                timestamp: Utc::now(),
                body: r#"{"data":{"x":1}}"#.to_string(),
            },
            now,
        );

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].type_name(), "graphql-request");
        match &messages[1] {
            PanelMessage::RequestCompleted(c) => {
                assert_eq!(c.id, "r1");
                assert_eq!(c.status, ExchangeStatus::Success);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(coordinator.stats().in_flight, 0);
    }

    #[test]
    fn test_other_strategy_events_are_ignored() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Relay, false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(7, tx);
        coordinator.on_network_event(
            before("r1", "https://api.test/graphql", Some(r#"{"query":"{a}"}"#)),
            Instant::now(),
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coordinator.stats().stored, 0);
    }

    // ------------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------------

    #[test]
    fn test_batched_messages_flush_as_batches() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Relay, true));
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect(3, tx);
        let now = Instant::now();
        coordinator.on_relayed_response(3, relayed("query A{a}"), now);
        coordinator.on_relayed_response(3, relayed("query B{b}"), now + Duration::from_millis(50));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coordinator.next_flush(), Some(now + Duration::from_millis(100)));

        coordinator.flush_due(now + Duration::from_millis(99));
        assert!(drain(&mut rx).is_empty());
        coordinator.flush_due(now + Duration::from_millis(100));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        match (&messages[0], &messages[1]) {
            (PanelMessage::GraphqlRequestBatch(requests), PanelMessage::RequestCompletedBatch(done)) => {
                assert_eq!(requests.len(), 2);
                assert_eq!(done.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_discards_queued_messages() {
        let mut coordinator = Coordinator::new(&config(CorrelationStrategy::Relay, true));
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = coordinator.connect(3, tx);
        coordinator.on_relayed_response(3, relayed("query A{a}"), Instant::now());
        assert_eq!(coordinator.stats().queued, 2);
        coordinator.disconnect(3, id);
        assert_eq!(coordinator.stats().queued, 0);
        assert!(coordinator.next_flush().is_none());
    }

    // ------------------------------------------------------------------------
    // Actor
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_actor_flushes_within_window() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, task) = spawn_coordinator(&config(CorrelationStrategy::Relay, true), shutdown_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.connect(5, tx).await.unwrap();

        handle
            .submit(Envelope::from_tab(5, RuntimeMessage::GraphqlResponse(relayed("query A{a}"))))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(150), rx.recv())
            .await
            .expect("batch flushed within the window")
            .unwrap();
        assert_eq!(first.type_name(), "graphql-request_batch");

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.stored, 1);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(handle.stats().await.is_err());
    }
}
