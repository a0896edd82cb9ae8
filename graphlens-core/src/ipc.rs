//! Runtime message protocol shared by the content relay, the coordinator and
//! the panel.
//!
//! Wire format: 4-byte little-endian length prefix + MessagePack payload with
//! named fields. Every message is discriminated by its `type` field.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::LensError;
use crate::models::{CapturedExchange, Completion, RequestFailure, TabId};

/// Response notification relayed from a page (`graphql-response`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedResponse {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
}

/// Native network observation events, each carrying the platform request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum NetworkEvent {
    BeforeRequest {
        request_id: String,
        tab_id: TabId,
        url: String,
        method: String,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        request_body: Option<String>,
    },
    HeadersReceived {
        request_id: String,
        timestamp: DateTime<Utc>,
        status_code: u16,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    ResponseBody {
        request_id: String,
        timestamp: DateTime<Utc>,
        body: String,
    },
    Completed {
        request_id: String,
        timestamp: DateTime<Utc>,
        status_code: u16,
    },
    ErrorOccurred {
        request_id: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
}

impl NetworkEvent {
    pub fn request_id(&self) -> &str {
        match self {
            NetworkEvent::BeforeRequest { request_id, .. }
            | NetworkEvent::HeadersReceived { request_id, .. }
            | NetworkEvent::ResponseBody { request_id, .. }
            | NetworkEvent::Completed { request_id, .. }
            | NetworkEvent::ErrorOccurred { request_id, .. } => request_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            NetworkEvent::BeforeRequest { timestamp, .. }
            | NetworkEvent::HeadersReceived { timestamp, .. }
            | NetworkEvent::ResponseBody { timestamp, .. }
            | NetworkEvent::Completed { timestamp, .. }
            | NetworkEvent::ErrorOccurred { timestamp, .. } => *timestamp,
        }
    }
}

/// Messages sent to the coordinator by relays and panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    #[serde(rename = "init")]
    Init {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    #[serde(rename = "graphql-response")]
    GraphqlResponse(RelayedResponse),
    #[serde(rename = "web-request")]
    WebRequest { event: NetworkEvent },
}

/// Identity of the context that sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub tab_id: TabId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub sender: Option<Sender>,
    pub message: RuntimeMessage,
}

impl Envelope {
    pub fn from_tab(tab_id: TabId, message: RuntimeMessage) -> Self {
        Self {
            sender: Some(Sender { tab_id }),
            message,
        }
    }

    pub fn anonymous(message: RuntimeMessage) -> Self {
        Self {
            sender: None,
            message,
        }
    }
}

/// Kinds of panel notification; batches are keyed by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Request,
    Completed,
    Error,
}

/// Messages sent by the coordinator to a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PanelMessage {
    #[serde(rename = "graphql-request")]
    GraphqlRequest(CapturedExchange),
    #[serde(rename = "graphql-request_batch")]
    GraphqlRequestBatch(Vec<CapturedExchange>),
    #[serde(rename = "request-completed")]
    RequestCompleted(Completion),
    #[serde(rename = "request-completed_batch")]
    RequestCompletedBatch(Vec<Completion>),
    #[serde(rename = "request-error")]
    RequestError(RequestFailure),
    #[serde(rename = "request-error_batch")]
    RequestErrorBatch(Vec<RequestFailure>),
}

impl PanelMessage {
    pub fn kind(&self) -> NotificationKind {
        match self {
            PanelMessage::GraphqlRequest(_) | PanelMessage::GraphqlRequestBatch(_) => {
                NotificationKind::Request
            }
            PanelMessage::RequestCompleted(_) | PanelMessage::RequestCompletedBatch(_) => {
                NotificationKind::Completed
            }
            PanelMessage::RequestError(_) | PanelMessage::RequestErrorBatch(_) => {
                NotificationKind::Error
            }
        }
    }

    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            PanelMessage::GraphqlRequest(_) => "graphql-request",
            PanelMessage::GraphqlRequestBatch(_) => "graphql-request_batch",
            PanelMessage::RequestCompleted(_) => "request-completed",
            PanelMessage::RequestCompletedBatch(_) => "request-completed_batch",
            PanelMessage::RequestError(_) => "request-error",
            PanelMessage::RequestErrorBatch(_) => "request-error_batch",
        }
    }

    /// Expand a batch into its singular messages; singular messages pass through.
    pub fn into_singles(self) -> Vec<PanelMessage> {
        match self {
            PanelMessage::GraphqlRequestBatch(items) => {
                items.into_iter().map(PanelMessage::GraphqlRequest).collect()
            }
            PanelMessage::RequestCompletedBatch(items) => {
                items.into_iter().map(PanelMessage::RequestCompleted).collect()
            }
            PanelMessage::RequestErrorBatch(items) => {
                items.into_iter().map(PanelMessage::RequestError).collect()
            }
            single => vec![single],
        }
    }

    /// Coalesce messages into one `_batch` message per kind, ordered by the
    /// first appearance of each kind. No message is dropped.
    pub fn coalesce(messages: Vec<PanelMessage>) -> Vec<PanelMessage> {
        let mut requests = Vec::new();
        let mut completions = Vec::new();
        let mut errors = Vec::new();
        let mut order: Vec<NotificationKind> = Vec::with_capacity(3);

        for message in messages.into_iter().flat_map(PanelMessage::into_singles) {
            let kind = message.kind();
            if !order.contains(&kind) {
                order.push(kind);
            }
            match message {
                PanelMessage::GraphqlRequest(ex) => requests.push(ex),
                PanelMessage::RequestCompleted(c) => completions.push(c),
                PanelMessage::RequestError(f) => errors.push(f),
                _ => unreachable!("into_singles never yields batches"),
            }
        }

        order
            .into_iter()
            .map(|kind| match kind {
                NotificationKind::Request => {
                    PanelMessage::GraphqlRequestBatch(std::mem::take(&mut requests))
                }
                NotificationKind::Completed => {
                    PanelMessage::RequestCompletedBatch(std::mem::take(&mut completions))
                }
                NotificationKind::Error => {
                    PanelMessage::RequestErrorBatch(std::mem::take(&mut errors))
                }
            })
            .collect()
    }
}

/// Length-delimited framing used on every IPC socket.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, LensError> {
    Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LensError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
