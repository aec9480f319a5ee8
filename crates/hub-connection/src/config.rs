//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use hasslink_protocol::constants::{
    DEFAULT_HOST, DEFAULT_PORT, EVENT_BUFFER, KEEPALIVE_INTERVAL, RECONNECT_DELAY,
    REQUEST_TIMEOUT, WS_PATH,
};

use crate::error::ConfigError;

/// Connection settings for one hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HassConfig {
    /// Hub host; empty means [`DEFAULT_HOST`].
    #[serde(default = "default_host")]
    pub host: String,

    /// Hub port; `0` means [`DEFAULT_PORT`].
    #[serde(default = "default_port")]
    pub port: u16,

    /// Long-lived access token. Required.
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Resolve every pending request with a `Connection closed` failure as
    /// soon as its connection closes, instead of letting each one run into
    /// its own timeout.
    #[serde(default)]
    pub cancel_pending_on_disconnect: bool,

    /// Broadcast buffer per subscription. Slow consumers lag past this.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_reconnect_delay_ms() -> u64 {
    RECONNECT_DELAY.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT.as_millis() as u64
}

fn default_keepalive_interval_ms() -> u64 {
    KEEPALIVE_INTERVAL.as_millis() as u64
}

fn default_event_buffer() -> usize {
    EVENT_BUFFER
}

impl Default for HassConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            cancel_pending_on_disconnect: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl HassConfig {
    /// Default settings with the given access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// WebSocket URL of the hub's real-time API.
    pub fn url(&self) -> String {
        let host = if self.host.is_empty() {
            DEFAULT_HOST
        } else {
            self.host.as_str()
        };
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        format!("ws://{host}:{port}{WS_PATH}")
    }

    /// Rejects settings the client cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Zero("reconnect_delay_ms"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("request_timeout_ms"));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Zero("keepalive_interval_ms"));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Zero("event_buffer"));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = HassConfig::new("T");
        assert_eq!(config.url(), "ws://127.0.0.1:8123/api/websocket");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(2000));
        assert_eq!(config.request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.keepalive_interval(), Duration::from_millis(2000));
        assert!(!config.cancel_pending_on_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_token_is_rejected() {
        let config = HassConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));

        let config = HassConfig::new("   ");
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut config = HassConfig::new("T");
        config.keepalive_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("keepalive_interval_ms"))
        ));
    }

    #[test]
    fn empty_host_and_zero_port_fall_back() {
        let mut config = HassConfig::new("T");
        config.host = String::new();
        config.port = 0;
        assert_eq!(config.url(), "ws://127.0.0.1:8123/api/websocket");

        config.host = "hub.local".into();
        config.port = 443;
        assert_eq!(config.url(), "ws://hub.local:443/api/websocket");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: HassConfig =
            serde_json::from_str(r#"{"host":"10.0.0.2","token":"abc"}"#).unwrap();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 8123);
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.event_buffer, EVENT_BUFFER);
    }
}
