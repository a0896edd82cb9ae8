//! GraphQL request heuristics shared by the interceptor and the coordinator.
//!
//! - Detection: decide whether a request is worth capturing at all
//! - Extraction: derive a display name and the raw document from a request body
//! - Classification: operation type from the document's leading keyword

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ANONYMOUS_OPERATION;

fn operation_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:query|mutation|subscription)\s+(\w+)").expect("static regex compiles")
    })
}

/// `true` when the URL mentions `graphql`, ignoring case.
pub fn is_graphql_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains("graphql")
}

/// `true` when a parsed body exposes a `query` or `mutation` key, either at the
/// top level or in the first element of a batched array.
pub fn body_exposes_operation(body: &Value) -> bool {
    let candidate = match body {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return false,
        },
        other => other,
    };
    candidate
        .as_object()
        .map(|obj| obj.contains_key("query") || obj.contains_key("mutation"))
        .unwrap_or(false)
}

/// Capture predicate. The URL test runs first so irrelevant traffic with a
/// non-GraphQL URL only pays for a body parse when it has a body at all.
pub fn is_graphql_request(url: &str, body: Option<&str>) -> bool {
    if is_graphql_url(url) {
        return true;
    }
    body.and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .map(|parsed| body_exposes_operation(&parsed))
        .unwrap_or(false)
}

/// Operation name from the document text, e.g. `query GetUser { … }` → `GetUser`.
pub fn operation_name_from_query(query: &str) -> Option<String> {
    operation_name_regex()
        .captures(query)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Best-effort operation name for a parsed request body.
///
/// Order: explicit `operationName`, then the name parsed from `query`, then the
/// first element of a batched array by the same rules, then
/// [`ANONYMOUS_OPERATION`].
pub fn extract_operation_name(body: &Value) -> String {
    match body {
        Value::Array(items) => items
            .first()
            .map(extract_operation_name)
            .unwrap_or_else(|| ANONYMOUS_OPERATION.to_string()),
        Value::Object(obj) => {
            if let Some(name) = obj
                .get("operationName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                return name.to_string();
            }
            obj.get("query")
                .and_then(Value::as_str)
                .and_then(operation_name_from_query)
                .unwrap_or_else(|| ANONYMOUS_OPERATION.to_string())
        }
        Value::String(query) => {
            operation_name_from_query(query).unwrap_or_else(|| ANONYMOUS_OPERATION.to_string())
        }
        _ => ANONYMOUS_OPERATION.to_string(),
    }
}

/// Raw document text of a request body; the first element's for batches.
pub fn extract_query(body: &Value) -> String {
    let candidate = match body {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return String::new(),
        },
        other => other,
    };
    candidate
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Everything the capture path derives from an outgoing body.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationMeta {
    pub operation_name: String,
    pub query: String,
    pub request_body: Option<Value>,
}

impl OperationMeta {
    /// Describe a raw request body. Bodies that are absent or not JSON yield
    /// an anonymous operation with no parsed body.
    pub fn from_raw_body(raw: Option<&str>) -> Self {
        match raw.and_then(|r| serde_json::from_str::<Value>(r).ok()) {
            Some(parsed) => Self::from_body(parsed),
            None => Self {
                operation_name: ANONYMOUS_OPERATION.to_string(),
                query: String::new(),
                request_body: None,
            },
        }
    }

    pub fn from_body(body: Value) -> Self {
        Self {
            operation_name: extract_operation_name(&body),
            query: extract_query(&body),
            request_body: Some(body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
    Unknown,
}

impl OperationType {
    /// Classify by leading keyword; shorthand documents (`{ … }`) are queries.
    pub fn detect(query: &str) -> Self {
        let trimmed = query.trim_start();
        if trimmed.is_empty() {
            OperationType::Unknown
        } else if trimmed.starts_with("mutation") {
            OperationType::Mutation
        } else if trimmed.starts_with("subscription") {
            OperationType::Subscription
        } else {
            OperationType::Query
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
            OperationType::Unknown => "unknown",
        }
    }
}
