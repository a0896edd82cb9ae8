use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Browser tab identifier as assigned by the host platform.
pub type TabId = i64;

/// Fallback name for operations that carry no name of their own.
pub const ANONYMOUS_OPERATION: &str = "Anonymous Operation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    #[default]
    Pending,
    Success,
    Error,
}

impl ExchangeStatus {
    /// `2xx` is success, everything else is an error.
    pub fn from_http(status_code: u16) -> Self {
        if (200..300).contains(&status_code) {
            ExchangeStatus::Success
        } else {
            ExchangeStatus::Error
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExchangeStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Success => "success",
            ExchangeStatus::Error => "error",
        }
    }
}

/// Rejected state machine transitions on a [`CapturedExchange`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("exchange {id} already completed as {status:?}")]
    AlreadyTerminal { id: String, status: ExchangeStatus },

    #[error("completion for {id} does not carry a terminal status")]
    NotTerminal { id: String },

    #[error("completion for {got} applied to exchange {expected}")]
    IdMismatch { expected: String, got: String },
}

/// One logical GraphQL request/response pair tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    pub id: String,
    pub url: String,
    pub tab_id: TabId,
    pub operation_name: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub status: ExchangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response: Option<Value>,
    /// Milliseconds between request start and completion.
    #[serde(default)]
    pub duration: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal update for an exchange, delivered as `request-completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub id: String,
    pub status: ExchangeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub response: Option<Value>,
}

impl Completion {
    pub fn from_http(id: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: id.into(),
            status: ExchangeStatus::from_http(status_code),
            status_code: Some(status_code),
            duration: None,
            response: None,
        }
    }

    pub fn with_duration(mut self, duration: Option<u64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_response(mut self, response: Option<Value>) -> Self {
        self.response = response;
        self
    }
}

/// Transport-level failure for an exchange, delivered as `request-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub id: String,
    pub error: String,
}

impl CapturedExchange {
    /// A fresh exchange in the `pending` state, stamped with the current time.
    pub fn pending(id: impl Into<String>, tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            tab_id,
            operation_name: ANONYMOUS_OPERATION.to_string(),
            query: String::new(),
            request_body: None,
            status: ExchangeStatus::Pending,
            status_code: None,
            response: None,
            duration: None,
            timestamp: Utc::now(),
            page_path: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a completion. Only the first terminal transition is accepted;
    /// fields absent from the completion keep their current values.
    pub fn complete(&mut self, completion: &Completion) -> Result<(), TransitionError> {
        if completion.id != self.id {
            return Err(TransitionError::IdMismatch {
                expected: self.id.clone(),
                got: completion.id.clone(),
            });
        }
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if !completion.status.is_terminal() {
            return Err(TransitionError::NotTerminal {
                id: self.id.clone(),
            });
        }

        self.status = completion.status;
        if completion.status_code.is_some() {
            self.status_code = completion.status_code;
        }
        if completion.duration.is_some() {
            self.duration = completion.duration;
        }
        if completion.response.is_some() {
            self.response = completion.response.clone();
        }
        Ok(())
    }

    /// Mark the exchange as failed at the transport level.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = ExchangeStatus::Error;
        self.error = Some(error.into());
        Ok(())
    }

    /// Snapshot of the terminal fields, as sent in `request-completed`.
    pub fn completion(&self) -> Completion {
        Completion {
            id: self.id.clone(),
            status: self.status,
            status_code: self.status_code,
            duration: self.duration,
            response: self.response.clone(),
        }
    }

    /// The request-side view: same identity and request data, no outcome.
    pub fn request_view(&self) -> Self {
        Self {
            status: ExchangeStatus::Pending,
            status_code: None,
            response: None,
            duration: None,
            error: None,
            ..self.clone()
        }
    }

    /// GraphQL variables of the request, looking into the first element of
    /// batched bodies.
    pub fn variables(&self) -> Option<&Value> {
        let body = self.request_body.as_ref()?;
        let body = match body {
            Value::Array(items) => items.first()?,
            other => other,
        };
        body.get("variables").filter(|v| !v.is_null())
    }
}
