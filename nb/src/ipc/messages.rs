//! IPC message types
//!
//! Line-delimited JSON protocol. Each message is a single JSON object followed
//! by `\n`, in both directions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::collector::{ErrorCode, ReadResult};
use crate::domain::Record;

/// Acknowledgement text for a subscribe request
pub const SUBSCRIBED_MESSAGE: &str = "Subscribed to notifications push events.";

/// Reasons an inbound line could not be turned into a request
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Request line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Kind of an inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Ping,
    ReadNotifications,
    SubscribeNotifications,
    /// Anything else, rendered for the error message
    Unknown(String),
}

impl RequestKind {
    /// Wire name of the request type
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::ReadNotifications => "read_notifications",
            Self::SubscribeNotifications => "subscribe_notifications",
            Self::Unknown(other) => other,
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => match s.as_str() {
                "ping" => Self::Ping,
                "read_notifications" => Self::ReadNotifications,
                "subscribe_notifications" => Self::SubscribeNotifications,
                other => Self::Unknown(other.to_string()),
            },
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown(Value::Null.to_string()),
        }
    }
}

/// Inbound request: `{"id": <any>, "type": <string>}`
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Echoed back verbatim; `null` when absent
    pub id: Value,
    pub kind: RequestKind,
}

impl Request {
    /// Build a request for the client side
    pub fn new(id: impl Into<Value>, kind: RequestKind) -> Self {
        Self { id: id.into(), kind }
    }

    /// Parse one raw line (newline optional)
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        let text = std::str::from_utf8(raw)?;
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(RequestError::NotAnObject(json_type_name(&value)));
        };

        let kind = RequestKind::from_value(object.get("type"));
        let id = object.remove("id").unwrap_or(Value::Null);
        Ok(Self { id, kind })
    }

    /// Serialize onto the wire
    pub fn to_line(&self) -> String {
        let mut object = Map::new();
        object.insert("id".to_string(), self.id.clone());
        object.insert("type".to_string(), Value::String(self.kind.as_str().to_string()));
        Value::Object(object).to_string()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Response body variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// `{"ok":true,"type":"pong"}`
    Pong {
        ok: bool,
        #[serde(rename = "type")]
        kind: String,
    },
    /// `{"ok":true,"message":"Subscribed..."}`
    Subscribed(SubscribeAck),
    /// Read results and every error response
    Read(ReadResult),
}

/// Acknowledgement of a subscribe request
///
/// Unknown fields are rejected so a read or error body never parses as an ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribeAck {
    pub ok: bool,
    pub message: String,
}

/// Outbound response: the body with the request id injected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn pong(id: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Pong {
                ok: true,
                kind: "pong".to_string(),
            },
        }
    }

    pub fn read(id: Value, result: ReadResult) -> Self {
        Self {
            id,
            body: ResponseBody::Read(result),
        }
    }

    pub fn subscribed(id: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Subscribed(SubscribeAck {
                ok: true,
                message: SUBSCRIBED_MESSAGE.to_string(),
            }),
        }
    }

    /// `READ_FAILED` response carrying `message`
    pub fn failed(id: Value, message: impl Into<String>) -> Self {
        Self::read(id, ReadResult::failure(ErrorCode::ReadFailed, message))
    }

    pub fn unknown_type(id: Value, kind: &str) -> Self {
        Self::failed(id, format!("Unknown request type: {}", kind))
    }

    /// Response to a line that never became a request; the id is always `null`
    pub fn invalid(error: &RequestError) -> Self {
        let message = match error {
            RequestError::LineTooLong(_) => error.to_string(),
            _ => format!("Invalid JSON request: {}", error),
        };
        Self::read(Value::Null, ReadResult::failure(ErrorCode::ReadFailed, message))
    }

    /// Whether the response reports success
    pub fn is_ok(&self) -> bool {
        match &self.body {
            ResponseBody::Pong { ok, .. } => *ok,
            ResponseBody::Subscribed(ack) => ack.ok,
            ResponseBody::Read(result) => result.ok,
        }
    }
}

/// Unsolicited push sent to subscribers after every refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "notifications")]
pub struct PushFrame {
    pub notifications: Vec<Record>,
}

impl PushFrame {
    pub fn new(notifications: Vec<Record>) -> Self {
        Self { notifications }
    }
}
