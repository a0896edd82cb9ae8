//! End-to-end capture over the coordinator socket: page interceptor →
//! content relay → coordinator → panel connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use graphlens_capture::{
    ContentRelay, Fetch, FetchXhrFactory, HttpRequest, HttpResponse, Page, RelayExit,
    RuntimeChannel, SocketChannel, TransportError, XhrFactory,
};
use graphlens_core::{CorrelationStrategy, Envelope, ExchangeStatus, LensConfig, NetworkEvent, PanelMessage, RuntimeMessage};
use graphlens_panel::PanelConnection;
use graphlens_server::server::run_unix_server;
use graphlens_server::subsystems::coordinator::{spawn_coordinator, CoordinatorHandle};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct JsonFetch;

#[async_trait]
impl Fetch for JsonFetch {
    async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from_static(br#"{"data":{"orders":[{"id":"o1"}]}}"#),
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    coordinator: CoordinatorHandle,
    shutdown: broadcast::Sender<()>,
}

async fn start(strategy: CorrelationStrategy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("graphlens.sock");

    let mut config = LensConfig::default();
    config.correlation.strategy = strategy;
    config.batching.enabled = false;
    config.service.socket_path = socket.to_string_lossy().into_owned();

    let (shutdown, _) = broadcast::channel(4);
    let (coordinator, _task) = spawn_coordinator(&config, shutdown.subscribe());

    let server_handle = coordinator.clone();
    let server_shutdown = shutdown.subscribe();
    let socket_path = config.service.socket_path.clone();
    tokio::spawn(async move {
        run_unix_server(&socket_path, server_handle, server_shutdown)
            .await
            .unwrap();
    });
    wait_for(|| socket.exists()).await;

    Harness {
        _dir: dir,
        socket,
        coordinator,
        shutdown,
    }
}

async fn wait_for<F: Fn() -> bool>(check: F) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn connect_panel(harness: &Harness, tab_id: i64) -> PanelConnection {
    let panel = PanelConnection::connect(&harness.socket, tab_id).await.unwrap();
    timeout(WAIT, async {
        while harness.coordinator.stats().await.unwrap().connections == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("panel registered");
    panel
}

async fn next(panel: &mut PanelConnection) -> PanelMessage {
    timeout(WAIT, panel.next_message())
        .await
        .expect("notification in time")
        .expect("connection open")
}

fn page(path: &str) -> Arc<Page> {
    let fetch: Arc<dyn Fetch> = Arc::new(JsonFetch);
    let xhr: Arc<dyn XhrFactory> = Arc::new(FetchXhrFactory::new(fetch.clone()));
    Arc::new(Page::new(path, fetch, xhr))
}

async fn channel(socket: &Path) -> Arc<dyn RuntimeChannel> {
    Arc::new(SocketChannel::connect(socket).await.unwrap())
}

// ===========================================================================
// Relay strategy
// ===========================================================================
#[tokio::test]
async fn test_page_capture_reaches_panel() {
    let harness = start(CorrelationStrategy::Relay).await;
    let mut panel = connect_panel(&harness, 42).await;

    let page = page("/orders");
    let relay = ContentRelay::new(42, page.clone(), channel(&harness.socket).await)
        .start(harness.shutdown.subscribe());
    wait_for(|| page.is_injected()).await;

    let body = json!({"query": "query ListOrders { orders { id } }", "variables": {"first": 1}});
    let response = page
        .fetch(HttpRequest::post_json("https://shop.test/graphql", &body))
        .await
        .unwrap();
    assert_eq!(response.status, 200, "page sees the untouched response");

    let id = match next(&mut panel).await {
        PanelMessage::GraphqlRequest(exchange) => {
            assert_eq!(exchange.tab_id, 42);
            assert_eq!(exchange.operation_name, "ListOrders");
            assert_eq!(exchange.page_path.as_deref(), Some("/orders"));
            assert_eq!(exchange.request_body, Some(body));
            exchange.id
        }
        other => panic!("expected graphql-request, got {other:?}"),
    };
    match next(&mut panel).await {
        PanelMessage::RequestCompleted(completion) => {
            assert_eq!(completion.id, id);
            assert_eq!(completion.status, ExchangeStatus::Success);
            assert_eq!(completion.response, Some(json!({"data": {"orders": [{"id": "o1"}]}})));
        }
        other => panic!("expected request-completed, got {other:?}"),
    }

    harness.shutdown.send(()).unwrap();
    assert_eq!(timeout(WAIT, relay).await.unwrap().unwrap(), RelayExit::Suspended);
}

#[tokio::test]
async fn test_other_tabs_do_not_reach_panel() {
    let harness = start(CorrelationStrategy::Relay).await;
    let mut panel = connect_panel(&harness, 1).await;

    let other = channel(&harness.socket).await;
    let response = graphlens_core::RelayedResponse {
        url: "https://api.test/graphql".to_string(),
        status: 200,
        body: None,
        operation_name: Some("Elsewhere".to_string()),
        query: None,
        request_body: None,
        page_path: None,
    };
    other
        .send(Envelope::from_tab(2, RuntimeMessage::GraphqlResponse(response.clone())))
        .await
        .unwrap();
    other
        .send(Envelope::from_tab(1, RuntimeMessage::GraphqlResponse(response)))
        .await
        .unwrap();

    match next(&mut panel).await {
        PanelMessage::GraphqlRequest(exchange) => assert_eq!(exchange.tab_id, 1),
        other => panic!("unexpected {other:?}"),
    }
    let stats = harness.coordinator.stats().await.unwrap();
    assert_eq!(stats.stored, 2, "capture continues for tabs without a panel");
}

#[tokio::test]
async fn test_panel_disconnect_unregisters() {
    let harness = start(CorrelationStrategy::Relay).await;
    let panel = connect_panel(&harness, 9).await;
    drop(panel);

    timeout(WAIT, async {
        while harness.coordinator.stats().await.unwrap().connections != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("panel unregistered after close");
}

// ===========================================================================
// Identifier strategy
// ===========================================================================
#[tokio::test]
async fn test_network_events_reach_panel() {
    let harness = start(CorrelationStrategy::Identifier).await;
    let mut panel = connect_panel(&harness, 5).await;
    let hooks = channel(&harness.socket).await;

    let started = chrono::Utc::now();
    let events = [
        NetworkEvent::BeforeRequest {
            request_id: "net-1".to_string(),
            tab_id: 5,
            url: "https://api.test/graphql".to_string(),
            method: "POST".to_string(),
            timestamp: started,
            request_body: Some(r#"{"query":"mutation Save{save}"}"#.to_string()),
        },
        NetworkEvent::ResponseBody {
            request_id: "net-1".to_string(),
            timestamp: started,
            body: r#"{"data":{"save":true}}"#.to_string(),
        },
        NetworkEvent::Completed {
            request_id: "net-1".to_string(),
            timestamp: started + chrono::Duration::milliseconds(30),
            status_code: 200,
        },
    ];
    for event in events {
        hooks
            .send(Envelope::anonymous(RuntimeMessage::WebRequest { event }))
            .await
            .unwrap();
    }

    assert_eq!(next(&mut panel).await.type_name(), "graphql-request");
    match next(&mut panel).await {
        PanelMessage::RequestCompleted(completion) => {
            assert_eq!(completion.id, "net-1");
            assert_eq!(completion.duration, Some(30));
        }
        other => panic!("unexpected {other:?}"),
    }
}
