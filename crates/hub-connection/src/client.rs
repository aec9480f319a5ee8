//! Public client handle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use hasslink_protocol::{Request, ResultMessage};

use crate::config::HassConfig;
use crate::dispatcher::{COMMAND_QUEUE_CAPACITY, Command, Dispatcher};
use crate::error::HassError;
use crate::readiness::{FetchStates, Readiness};
use crate::transport::{Connector, TungsteniteConnector};
use crate::types::{ConnectionStatus, EventStream, OpenOutcome};

/// Handle to a running hub client.
///
/// Cheap to clone; every clone talks to the same connection. The client
/// keeps reconnecting in the background until [`shutdown`](Self::shutdown).
#[derive(Debug, Clone)]
pub struct HassClient {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    ha_version: watch::Receiver<Option<String>>,
}

impl HassClient {
    /// Connects over WebSocket and loads entity states on every
    /// connection before reporting `Ready`.
    ///
    /// Returns once the first attempt has opened or failed. The client is
    /// returned either way; after a failure it keeps retrying.
    pub async fn connect(config: HassConfig) -> Result<(Self, OpenOutcome), HassError> {
        Self::connect_with(config, Arc::new(TungsteniteConnector), Arc::new(FetchStates)).await
    }

    /// Like [`connect`](Self::connect) with a custom socket connector and
    /// readiness hook.
    pub async fn connect_with(
        config: HassConfig,
        connector: Arc<dyn Connector>,
        readiness: Arc<dyn Readiness>,
    ) -> Result<(Self, OpenOutcome), HassError> {
        config.validate()?;

        let (commands, queue) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let (version_tx, ha_version) = watch::channel(None);

        let client = Self {
            commands: commands.clone(),
            status,
            ha_version,
        };

        let mut dispatcher = Dispatcher::new(
            &config,
            connector,
            readiness,
            client.clone(),
            commands,
            queue,
            status_tx,
            version_tx,
        );
        let opened = dispatcher.start();
        tokio::spawn(dispatcher.run());

        let outcome = opened
            .await
            .unwrap_or_else(|_| OpenOutcome::Failed("client shut down".into()));
        debug!(?outcome, "first connection attempt finished");
        Ok((client, outcome))
    }

    /// Sends a correlated request and waits for its result.
    ///
    /// Never fails: not being connected, timeouts and hub errors all come
    /// back as a failed [`ResultMessage`]. A request without an id gets
    /// the next id of the current connection.
    pub async fn send(&self, request: Request) -> ResultMessage {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Send { request, reply })
            .await
            .is_err()
        {
            return ResultMessage::not_connected();
        }
        rx.await.unwrap_or_else(|_| ResultMessage::not_connected())
    }

    /// Returns the event stream for `event_type` (`None` for all events).
    ///
    /// Repeated calls with the same type return the same stream. The
    /// stream keeps delivering across reconnects.
    pub async fn select(&self, event_type: Option<&str>) -> Result<EventStream, HassError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Select {
                event_type: event_type.map(str::to_string),
                reply,
            })
            .await
            .map_err(|_| HassError::Closed)?;
        rx.await.map_err(|_| HassError::Closed)
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Waits until the connection is `Ready`.
    pub async fn wait_ready(&self) -> Result<(), HassError> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| *s == ConnectionStatus::Ready)
            .await
            .map(|_| ())
            .map_err(|_| HassError::Closed)
    }

    /// Version advertised by the hub during the last handshake.
    pub fn ha_version(&self) -> Option<String> {
        self.ha_version.borrow().clone()
    }

    /// Drops the current connection; a new one follows after the
    /// reconnect delay.
    pub async fn reconnect(&self) -> Result<(), HassError> {
        self.command(Command::Reconnect).await
    }

    /// Closes the current connection. The client still reconnects after
    /// the delay; use [`shutdown`](Self::shutdown) to stop for good.
    pub async fn disconnect(&self) -> Result<(), HassError> {
        self.command(Command::Disconnect).await
    }

    /// Stops the client. Pending requests resolve with a
    /// `Connection closed` failure, and every [`EventStream`] closes once
    /// the dispatcher has stopped. Idempotent.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn command(&self, command: Command) -> Result<(), HassError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HassError::Closed)
    }
}
