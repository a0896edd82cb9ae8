//! The page's two network primitives: a `fetch`-style call and an XHR-style
//! object with separate `open` and `send` steps.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
pub trait Xhr: Send {
    fn open(&mut self, method: &str, url: &str);

    async fn send(&mut self, body: Option<String>) -> Result<HttpResponse, TransportError>;
}

/// Constructor for XHR objects, the equivalent of `new XMLHttpRequest()`.
pub trait XhrFactory: Send + Sync {
    fn create(&self) -> Box<dyn Xhr>;
}

/// `fetch` backed by a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Other(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// XHR object implemented on top of a `fetch` primitive.
pub struct FetchXhr {
    fetch: Arc<dyn Fetch>,
    target: Option<(String, String)>,
}

impl FetchXhr {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            fetch,
            target: None,
        }
    }
}

#[async_trait]
impl Xhr for FetchXhr {
    fn open(&mut self, method: &str, url: &str) {
        self.target = Some((method.to_string(), url.to_string()));
    }

    async fn send(&mut self, body: Option<String>) -> Result<HttpResponse, TransportError> {
        let (method, url) = self.target.clone().ok_or(TransportError::NotOpened)?;
        self.fetch
            .fetch(HttpRequest {
                method,
                url,
                headers: Vec::new(),
                body,
            })
            .await
    }
}

pub struct FetchXhrFactory {
    fetch: Arc<dyn Fetch>,
}

impl FetchXhrFactory {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

impl XhrFactory for FetchXhrFactory {
    fn create(&self) -> Box<dyn Xhr> {
        Box::new(FetchXhr::new(self.fetch.clone()))
    }
}
