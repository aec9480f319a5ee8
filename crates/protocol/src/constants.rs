use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::ErrorCode;

/// Hub address used when the configuration leaves the host empty.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Hub port used when the configuration leaves the port unset.
pub const DEFAULT_PORT: u16 = 8123;

/// Path of the real-time API endpoint on the hub.
pub const WS_PATH: &str = "/api/websocket";

/// Fixed delay between a closed connection and the next connect attempt.
///
/// There is no backoff and no jitter: the client retries at this pace
/// forever.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Time a correlated request may wait for its `result` before it is
/// resolved with a synthetic timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// How often the keepalive checks whether a ping is due.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(2000);

/// Maximum inbound message size in bytes (16 MB).
///
/// `get_states` on a large installation easily exceeds the tungstenite
/// default frame limits.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Capacity of each subscription's broadcast buffer.
pub const EVENT_BUFFER: usize = 256;

/// Synthetic result code: request attempted while not connected.
pub const ERR_CODE_NOT_CONNECTED: i64 = -1;
/// Synthetic result code: no matching result within the timeout window.
pub const ERR_CODE_TIMEOUT: i64 = -2;
/// Synthetic result code: connection closed while the request was pending.
pub const ERR_CODE_CONNECTION_CLOSED: i64 = -3;
/// Synthetic result code: caller-supplied id already pending.
pub const ERR_CODE_DUPLICATE_ID: i64 = -4;
/// Synthetic result code: caller-supplied id outside `1..=MAX_REQUEST_ID`.
pub const ERR_CODE_INVALID_ID: i64 = -5;

/// Largest request id. Ids travel as JSON numbers, which are only exact
/// up to 2^53 - 1 on the hub side.
pub const MAX_REQUEST_ID: u64 = (1 << 53) - 1;

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Handshake
    #[serde(rename = "auth_required")]
    AuthRequired,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "auth_ok")]
    AuthOk,
    #[serde(rename = "auth_invalid")]
    AuthInvalid,

    // Responses and pushes from the hub
    #[serde(rename = "result")]
    Result,
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "pong")]
    Pong,

    // Commands to the hub
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "subscribe_events")]
    SubscribeEvents,
    #[serde(rename = "unsubscribe_events")]
    UnsubscribeEvents,
    #[serde(rename = "get_states")]
    GetStates,
    #[serde(rename = "get_config")]
    GetConfig,
    #[serde(rename = "get_services")]
    GetServices,
    #[serde(rename = "call_service")]
    CallService,
    #[serde(rename = "fire_event")]
    FireEvent,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Classification of a failed [`ResultMessage`](crate::ResultMessage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Sent while the connection was below `Connected`; nothing hit the wire.
    NotConnected,
    /// No result arrived within the request timeout.
    Timeout,
    /// The connection closed while the request was pending.
    ConnectionClosed,
    /// The caller reused an id that was still pending.
    DuplicateId,
    /// The caller-supplied id was outside the valid range.
    InvalidId,
    /// The hub answered with an error of its own.
    Remote(ErrorCode),
}

impl FailureKind {
    /// Maps a result error code back to its failure kind.
    ///
    /// Only the client's own negative integer codes are special; anything
    /// else, string codes included, came from the hub.
    pub fn from_code(code: &ErrorCode) -> Self {
        match code.as_int() {
            Some(ERR_CODE_NOT_CONNECTED) => Self::NotConnected,
            Some(ERR_CODE_TIMEOUT) => Self::Timeout,
            Some(ERR_CODE_CONNECTION_CLOSED) => Self::ConnectionClosed,
            Some(ERR_CODE_DUPLICATE_ID) => Self::DuplicateId,
            Some(ERR_CODE_INVALID_ID) => Self::InvalidId,
            _ => Self::Remote(code.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::SubscribeEvents).unwrap();
        assert_eq!(json, "\"subscribe_events\"");
        let parsed: MessageType = serde_json::from_str("\"auth_invalid\"").unwrap();
        assert_eq!(parsed, MessageType::AuthInvalid);
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let parsed: MessageType = serde_json::from_str("\"render_template\"").unwrap();
        assert_eq!(parsed, MessageType::Unknown);
    }

    #[test]
    fn failure_kind_from_code() {
        let kind = |code: ErrorCode| FailureKind::from_code(&code);
        assert_eq!(kind(ErrorCode::Int(-1)), FailureKind::NotConnected);
        assert_eq!(kind(ErrorCode::Int(-2)), FailureKind::Timeout);
        assert_eq!(kind(ErrorCode::Int(-3)), FailureKind::ConnectionClosed);
        assert_eq!(kind(ErrorCode::Int(-4)), FailureKind::DuplicateId);
        assert_eq!(kind(ErrorCode::Int(-5)), FailureKind::InvalidId);
        assert_eq!(kind(ErrorCode::Int(404)), FailureKind::Remote(ErrorCode::Int(404)));
        assert_eq!(
            kind("unknown_command".into()),
            FailureKind::Remote(ErrorCode::Str("unknown_command".into()))
        );
    }
}
