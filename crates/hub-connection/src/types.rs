//! Public types for the hub connection.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast;

use hasslink_protocol::HassEvent;

/// Connection status. The order is significant: requests may only be
/// sent at `Connected` or above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionStatus {
    /// No transport, or waiting out the reconnect delay.
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Access token sent, waiting for the verdict.
    Authenticating,
    /// Authenticated; requests are accepted.
    Connected,
    /// Authenticated and the readiness fetch has completed.
    Ready,
}

impl ConnectionStatus {
    /// Whether correlated requests may be sent in this status.
    pub fn can_send(self) -> bool {
        self >= ConnectionStatus::Connected
    }

    pub(crate) fn describe(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected from hub",
            ConnectionStatus::Connecting => "connecting to hub",
            ConnectionStatus::Authenticating => "sending auth with access token",
            ConnectionStatus::Connected => "authenticated with hub",
            ConnectionStatus::Ready => "hub ready",
        }
    }
}

/// Outcome of the first connect attempt.
///
/// The client is returned either way and keeps retrying in the
/// background after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The WebSocket opened.
    Opened,
    /// The first attempt failed.
    Failed(String),
}

/// Long-lived handle to one event subscription.
///
/// Every `select` for the same event type returns a clone of the same
/// stream, and the stream survives reconnects. The client owns the
/// channel; once it has shut down, receivers see `RecvError::Closed`
/// and `subscribe` hands out receivers that are already closed.
#[derive(Debug, Clone)]
pub struct EventStream {
    event_type: Option<String>,
    sender: Weak<broadcast::Sender<HassEvent>>,
}

impl EventStream {
    pub(crate) fn new(
        event_type: Option<String>,
        sender: &Arc<broadcast::Sender<HassEvent>>,
    ) -> Self {
        Self {
            event_type,
            sender: Arc::downgrade(sender),
        }
    }

    /// The subscribed event type; `None` for the wildcard subscription.
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HassEvent> {
        match self.sender.upgrade() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Whether both handles refer to the same underlying stream.
    pub fn same_stream(&self, other: &EventStream) -> bool {
        Weak::ptr_eq(&self.sender, &other.sender)
    }

    /// Whether the client that fed this stream has shut down.
    pub fn is_closed(&self) -> bool {
        self.sender.strong_count() == 0
    }
}
