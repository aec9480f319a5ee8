use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    ERR_CODE_CONNECTION_CLOSED, ERR_CODE_DUPLICATE_ID, ERR_CODE_INVALID_ID,
    ERR_CODE_NOT_CONNECTED, ERR_CODE_TIMEOUT, FailureKind, MessageType,
};
use crate::event::HassEvent;

/// Outbound message.
///
/// The hub protocol is flat: command arguments sit next to `id` and
/// `type` at the top level, so extra fields are flattened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Request {
    /// Creates a request of the given type without id or fields.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            id: None,
            msg_type,
            fields: Map::new(),
        }
    }

    /// Sets an explicit correlation id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Adds a top-level field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Merges the fields of a serializable object into the request.
    ///
    /// `id` and `type` keys of the payload are ignored. A payload that
    /// does not serialize to an object (or null) is rejected.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => {
                for (key, value) in map {
                    if key != "id" && key != "type" {
                        self.fields.insert(key, value);
                    }
                }
                Ok(self)
            }
            Value::Null => Ok(self),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "request payload must be a JSON object, got {other}"
            ))),
        }
    }

    /// Returns a top-level field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Credential presentation; sent without an id.
    pub fn auth(access_token: &str) -> Self {
        Self::new(MessageType::Auth).with_field("access_token", access_token)
    }

    /// Keepalive ping.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    /// Event subscription; `None` subscribes to every event.
    pub fn subscribe_events(event_type: Option<&str>) -> Self {
        let req = Self::new(MessageType::SubscribeEvents);
        match event_type {
            Some(t) => req.with_field("event_type", t),
            None => req,
        }
    }

    /// Fetch of the full entity state table.
    pub fn get_states() -> Self {
        Self::new(MessageType::GetStates)
    }
}

/// Error code of a failed result.
///
/// The hub sends strings (`"not_found"`, `"unknown_command"`); codes the
/// client synthesizes are negative integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Int(i64),
    Str(String),
}

impl ErrorCode {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ErrorCode::Int(code) => Some(*code),
            ErrorCode::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ErrorCode::Str(code) => Some(code),
            ErrorCode::Int(_) => None,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Int(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Str(code.to_string())
    }
}

/// Error details in a `result` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

/// Response to a correlated request.
///
/// Synthetic failures produced by the client (not connected, timeout)
/// use the same shape, so callers only ever deal with one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
    /// Fields the hub added that are not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultMessage {
    /// Creates a failed result.
    pub fn failure(id: u64, code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: Value::Null,
            error: Some(ResultError {
                code: code.into(),
                message: message.into(),
            }),
            extra: Map::new(),
        }
    }

    /// Request attempted below `Connected`. Carries no id.
    pub fn not_connected() -> Self {
        Self::failure(0, ERR_CODE_NOT_CONNECTED, "Not connected to HA")
    }

    /// No result arrived within the timeout window.
    pub fn timeout(id: u64) -> Self {
        Self::failure(id, ERR_CODE_TIMEOUT, "Timeout")
    }

    /// Connection closed while the request was pending.
    pub fn connection_closed(id: u64) -> Self {
        Self::failure(id, ERR_CODE_CONNECTION_CLOSED, "Connection closed")
    }

    /// The id is already pending on this connection.
    pub fn duplicate_id(id: u64) -> Self {
        Self::failure(id, ERR_CODE_DUPLICATE_ID, "Duplicate request id")
    }

    /// The caller-supplied id is outside `1..=MAX_REQUEST_ID`.
    pub fn invalid_id(id: u64) -> Self {
        Self::failure(id, ERR_CODE_INVALID_ID, "Invalid request id")
    }

    /// A `pong` answers a ping the same way a successful `result` would.
    pub fn pong(id: u64) -> Self {
        Self {
            id,
            success: true,
            result: Value::Null,
            error: None,
            extra: Map::new(),
        }
    }

    /// Classifies the failure, or `None` on success.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.error {
            Some(err) => Some(FailureKind::from_code(&err.code)),
            None if self.success => None,
            None => Some(FailureKind::Remote(ErrorCode::Int(0))),
        }
    }

    /// Deserializes the `result` payload into the given type.
    pub fn parse_result<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.result)
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Incoming {
    #[serde(rename = "auth_required")]
    AuthRequired {
        #[serde(default)]
        ha_version: String,
    },
    #[serde(rename = "auth_ok")]
    AuthOk {
        #[serde(default)]
        ha_version: String,
    },
    #[serde(rename = "auth_invalid")]
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "result")]
    Result(ResultMessage),
    #[serde(rename = "event")]
    Event {
        #[serde(default)]
        id: u64,
        event: HassEvent,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        id: u64,
    },
    #[serde(other)]
    Unknown,
}

impl Incoming {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
