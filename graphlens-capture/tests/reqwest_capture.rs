//! Interceptor over the real `reqwest` fetch primitive, against a mock server.

use std::sync::Arc;

use graphlens_capture::{
    install_interceptor, Fetch, FetchXhrFactory, HttpRequest, Page, ReqwestFetch, XhrFactory,
};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page() -> Page {
    let fetch: Arc<dyn Fetch> = Arc::new(ReqwestFetch::default());
    let xhr: Arc<dyn XhrFactory> = Arc::new(FetchXhrFactory::new(fetch.clone()));
    Page::new("/app", fetch, xhr)
}

#[tokio::test]
async fn test_fetch_capture_against_mock_graphql_server() {
    let server = MockServer::start().await;
    let request_body = json!({
        "operationName": "ListOrders",
        "query": "query ListOrders { orders { id } }",
        "variables": {"first": 10}
    });
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_json(&request_body))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"orders": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let page = page();
    install_interceptor(&page);
    let mut rx = page.events().subscribe();

    let url = format!("{}/graphql", server.uri());
    let response = page
        .fetch(HttpRequest::post_json(&url, &request_body))
        .await
        .expect("fetch should succeed");

    assert_eq!(response.status, 200);
    assert_eq!(response.json().unwrap(), json!({"data": {"orders": []}}));

    let event = rx.try_recv().expect("exchange should be captured");
    assert_eq!(event.url, url);
    assert_eq!(event.operation_name, "ListOrders");
    assert_eq!(event.body, Some(json!({"data": {"orders": []}})));
    assert_eq!(event.request_body, Some(request_body));
}

#[tokio::test]
async fn test_http_error_status_is_still_captured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/graphql"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"errors": [{"message": "boom"}]})),
        )
        .mount(&server)
        .await;

    let page = page();
    install_interceptor(&page);
    let mut rx = page.events().subscribe();

    let mut xhr = page.xhr();
    xhr.open("POST", &format!("{}/api/graphql", server.uri()));
    let response = xhr
        .send(Some(r#"{"query":"mutation Save { save }"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status, 500);

    let event = rx.try_recv().unwrap();
    assert_eq!(event.status, 500);
    assert_eq!(event.operation_name, "Save");
    assert_eq!(event.body, Some(json!({"errors": [{"message": "boom"}]})));
}

#[tokio::test]
async fn test_plain_rest_call_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let page = page();
    install_interceptor(&page);
    let mut rx = page.events().subscribe();

    let response = page
        .fetch(HttpRequest::get(format!("{}/api/users", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
