//! Error types for the hub connection.

use tokio_tungstenite::tungstenite;

/// Invalid client configuration. Fatal at construction, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "missing access token (create a long-lived access token in the hub user profile)"
    )]
    MissingToken,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Errors from the public client API.
///
/// Per-request failures are not errors: they come back as
/// [`ResultMessage`](hasslink_protocol::ResultMessage) values.
#[derive(Debug, thiserror::Error)]
pub enum HassError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("client has been shut down")]
    Closed,
}

/// Socket-level failures. Normalized into the close/reconnect path.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport closed")]
    Closed,
}
