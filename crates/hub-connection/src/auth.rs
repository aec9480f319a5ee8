//! Authentication handshake.
//!
//! Each connection runs the same exchange: the hub greets with
//! `auth_required`, the client answers with its access token, and the hub
//! replies `auth_ok` or `auth_invalid`. The controller only tracks where
//! the current connection stands; status changes are applied by the
//! dispatcher.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use hasslink_protocol::Request;

/// Handshake progress of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthState {
    AwaitingHello,
    Authenticating,
    Connected,
    Ready,
    Invalid,
}

pub(crate) struct AuthController {
    token: String,
    state: AuthState,
    version_tx: watch::Sender<Option<String>>,
}

impl AuthController {
    pub(crate) fn new(token: String, version_tx: watch::Sender<Option<String>>) -> Self {
        Self {
            token,
            state: AuthState::AwaitingHello,
            version_tx,
        }
    }

    pub(crate) fn state(&self) -> AuthState {
        self.state
    }

    /// Starts over for a new connection.
    pub(crate) fn reset(&mut self) {
        self.state = AuthState::AwaitingHello;
    }

    /// Answers the hub's greeting with the access token.
    ///
    /// Returns `None` if a greeting arrives mid-handshake.
    pub(crate) fn on_auth_required(&mut self, ha_version: &str) -> Option<Request> {
        if self.state != AuthState::AwaitingHello {
            warn!(state = ?self.state, "unexpected auth_required, ignoring");
            return None;
        }
        debug!(ha_version, "hub requested authentication");
        self.record_version(ha_version);
        self.state = AuthState::Authenticating;
        Some(Request::auth(&self.token))
    }

    /// Returns `true` when this completes the handshake.
    pub(crate) fn on_auth_ok(&mut self, ha_version: &str) -> bool {
        if self.state != AuthState::Authenticating {
            warn!(state = ?self.state, "unexpected auth_ok, ignoring");
            return false;
        }
        info!(ha_version, "authenticated with hub");
        self.record_version(ha_version);
        self.state = AuthState::Connected;
        true
    }

    /// Returns `true` when the token was rejected during the handshake.
    /// The connection is not retried any differently; a rejected token
    /// will keep being rejected on every reconnect.
    pub(crate) fn on_auth_invalid(&mut self, message: &str) -> bool {
        if self.state != AuthState::Authenticating {
            warn!(state = ?self.state, "unexpected auth_invalid, ignoring");
            return false;
        }
        warn!(message, "hub rejected access token");
        self.state = AuthState::Invalid;
        true
    }

    /// Readiness fetch finished. Returns `true` on the first completion
    /// of an authenticated connection.
    pub(crate) fn on_ready(&mut self) -> bool {
        if self.state != AuthState::Connected {
            return false;
        }
        self.state = AuthState::Ready;
        true
    }

    fn record_version(&self, ha_version: &str) {
        if ha_version.is_empty() {
            return;
        }
        self.version_tx.send_if_modified(|current| {
            if current.as_deref() == Some(ha_version) {
                false
            } else {
                *current = Some(ha_version.to_string());
                true
            }
        });
    }
}
