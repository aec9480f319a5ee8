//! Connection manager owning the physical connection and its retry policy.
//!
//! Holds the current [`Transport`], the connection epoch, the published
//! status, the request-id counter and the keepalive bookkeeping. Closing
//! the current transport always schedules a new connect after a fixed
//! delay; the only way out of the retry loop is [`ConnectionManager::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use hasslink_protocol::Request;

use crate::config::HassConfig;
use crate::dispatcher::Command;
use crate::error::TransportError;
use crate::transport::{Connector, Transport};
use crate::types::{ConnectionStatus, OpenOutcome};

pub(crate) struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    signals: mpsc::Sender<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    transport: Option<Transport>,
    epoch: u64,
    next_id: u64,
    ping_outstanding: bool,
    last_message_at: Instant,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
    /// Resolved by the first `Opened`/`Errored` of the epoch it was
    /// created for.
    open_waiter: Option<(u64, oneshot::Sender<OpenOutcome>)>,
    retrying: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: &HassConfig,
        connector: Arc<dyn Connector>,
        signals: mpsc::Sender<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            url: config.url(),
            connector,
            signals,
            status_tx,
            transport: None,
            epoch: 0,
            next_id: 1,
            ping_outstanding: false,
            last_message_at: Instant::now(),
            reconnect_delay: config.reconnect_delay(),
            keepalive_interval: config.keepalive_interval(),
            open_waiter: None,
            retrying: true,
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether `epoch` belongs to the live transport.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.transport.as_ref().is_some_and(|t| t.epoch() == epoch)
    }

    /// Creates a new transport under a fresh epoch.
    ///
    /// The returned receiver resolves on the first successful open or the
    /// first error of this attempt.
    pub(crate) fn connect(&mut self) -> oneshot::Receiver<OpenOutcome> {
        self.epoch += 1;
        let epoch = self.epoch;
        info!(url = %self.url, epoch, "connecting to hub");

        let (tx, rx) = oneshot::channel();
        self.open_waiter = Some((epoch, tx));
        self.transport = Some(Transport::open(
            epoch,
            self.connector.clone(),
            self.url.clone(),
            self.signals.clone(),
        ));
        self.set_status(ConnectionStatus::Connecting);
        rx
    }

    pub(crate) fn on_opened(&mut self, epoch: u64) {
        if !self.is_current(epoch) {
            trace!(epoch, "ignoring open of superseded transport");
            return;
        }
        self.last_message_at = Instant::now();
        self.resolve_open_waiter(epoch, OpenOutcome::Opened);
    }

    /// Errors only precede a close; the close drives reconnection.
    pub(crate) fn on_errored(&mut self, epoch: u64, error: &str) {
        if !self.is_current(epoch) {
            return;
        }
        warn!(epoch, error, "hub transport error");
        self.resolve_open_waiter(epoch, OpenOutcome::Failed(error.to_string()));
    }

    /// Handles the close of a transport. Returns `true` when it was the
    /// current one (and a reconnect has been scheduled).
    pub(crate) fn on_closed(&mut self, epoch: u64, reason: Option<&str>) -> bool {
        if !self.is_current(epoch) {
            trace!(epoch, "ignoring close of superseded transport");
            return false;
        }

        info!(epoch, reason = reason.unwrap_or(""), "hub disconnected");
        self.transport = None;
        self.resolve_open_waiter(
            epoch,
            OpenOutcome::Failed(reason.unwrap_or("connection closed").to_string()),
        );
        self.set_status(ConnectionStatus::Disconnected);

        if self.retrying {
            let signals = self.signals.clone();
            let delay = self.reconnect_delay;
            debug!(epoch, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = signals.send(Command::ReconnectDue).await;
            });
        }
        true
    }

    /// The reconnect delay elapsed.
    pub(crate) fn on_reconnect_due(&mut self) {
        if self.retrying && self.transport.is_none() {
            // The open signal of a reconnect has no waiter.
            drop(self.connect());
        }
    }

    /// Force-closes the current transport; the close handler reconnects.
    /// No-op when nothing is connected.
    pub(crate) fn reconnect(&mut self) {
        if let Some(transport) = &self.transport {
            debug!(epoch = transport.epoch(), "forcing reconnect");
            transport.close();
        }
    }

    /// Caller-initiated close. Follows the same close, delay, reconnect
    /// path as any other close.
    pub(crate) fn disconnect(&mut self) {
        if let Some(transport) = &self.transport {
            info!(epoch = transport.epoch(), "disconnecting from hub");
            transport.close();
        }
    }

    /// Stops retrying and drops the transport.
    pub(crate) fn shutdown(&mut self) {
        self.retrying = false;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        if status == ConnectionStatus::Connected {
            self.next_id = 1;
            self.ping_outstanding = false;
        }
        info!(status = ?status, epoch = self.epoch, "connection status: {}", status.describe());
        self.status_tx.send_replace(status);
    }

    /// Allocates the next request id of this connection.
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Moves the counter past a caller-chosen id so later automatic ids
    /// never collide with it.
    pub(crate) fn reserve_id(&mut self, id: u64) {
        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }
    }

    pub(crate) fn note_message(&mut self) {
        self.last_message_at = Instant::now();
    }

    /// A ping is due when authenticated, silent for a full interval and
    /// no ping is already in flight.
    pub(crate) fn keepalive_due(&self, now: Instant) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Connected | ConnectionStatus::Ready
        ) && !self.ping_outstanding
            && self.last_message_at + self.keepalive_interval < now
    }

    pub(crate) fn set_ping_outstanding(&mut self, outstanding: bool) {
        self.ping_outstanding = outstanding;
    }

    /// Serializes and queues a message on the current transport.
    pub(crate) fn transmit(&self, request: &Request) -> Result<(), TransportError> {
        let transport = self.transport.as_ref().ok_or(TransportError::Closed)?;
        let json = serde_json::to_string(request)?;
        transport.send_text(json)
    }

    fn resolve_open_waiter(&mut self, epoch: u64, outcome: OpenOutcome) {
        if self.open_waiter.as_ref().is_some_and(|(e, _)| *e == epoch)
            && let Some((_, tx)) = self.open_waiter.take()
        {
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeConnector;
    use crate::transport::SignalKind;
    use hasslink_protocol::constants::MAX_REQUEST_ID;

    fn manager(
        connector: FakeConnector,
    ) -> (
        ConnectionManager,
        mpsc::Receiver<Command>,
        watch::Receiver<ConnectionStatus>,
    ) {
        let mut config = HassConfig::new("T");
        config.reconnect_delay_ms = 20;
        let (tx, rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let mgr = ConnectionManager::new(&config, Arc::new(connector), tx, status_tx);
        (mgr, rx, status_rx)
    }

    /// Feeds transport signals back into the manager until `pred` holds.
    async fn pump_until(
        mgr: &mut ConnectionManager,
        rx: &mut mpsc::Receiver<Command>,
        mut pred: impl FnMut(&Command) -> bool,
    ) {
        while let Some(cmd) = rx.recv().await {
            let done = pred(&cmd);
            match cmd {
                Command::Transport(signal) => match signal.kind {
                    SignalKind::Opened => mgr.on_opened(signal.epoch),
                    SignalKind::Errored(e) => mgr.on_errored(signal.epoch, &e),
                    SignalKind::Closed(reason) => {
                        mgr.on_closed(signal.epoch, reason.as_deref());
                    }
                    SignalKind::Message(_) => {}
                },
                Command::ReconnectDue => mgr.on_reconnect_due(),
                _ => {}
            }
            if done {
                return;
            }
        }
    }

    #[tokio::test]
    async fn connect_increments_epoch_and_sets_connecting() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, status) = manager(connector);

        assert_eq!(mgr.epoch(), 0);
        let _opened = mgr.connect();
        assert_eq!(mgr.epoch(), 1);
        assert_eq!(*status.borrow(), ConnectionStatus::Connecting);
        assert!(mgr.is_current(1));
    }

    #[tokio::test]
    async fn first_open_resolves_connect_signal() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, mut rx, _status) = manager(connector);

        let opened = mgr.connect();
        pump_until(&mut mgr, &mut rx, |c| {
            matches!(c, Command::Transport(s) if matches!(s.kind, SignalKind::Opened))
        })
        .await;
        assert_eq!(opened.await.unwrap(), OpenOutcome::Opened);
    }

    #[tokio::test]
    async fn first_error_resolves_connect_signal_and_retries() {
        let (connector, mut hub) = FakeConnector::new();
        connector.fail_next(1);
        let (mut mgr, mut rx, status) = manager(connector);

        let opened = mgr.connect();
        pump_until(&mut mgr, &mut rx, |c| {
            matches!(c, Command::Transport(s) if matches!(s.kind, SignalKind::Closed(_)))
        })
        .await;
        assert!(matches!(opened.await.unwrap(), OpenOutcome::Failed(_)));
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);

        // The retry loop opens a second transport after the delay.
        pump_until(&mut mgr, &mut rx, |c| matches!(c, Command::ReconnectDue)).await;
        assert_eq!(mgr.epoch(), 2);
        let _conn = hub.accept().await;
    }

    #[tokio::test]
    async fn reconnect_without_transport_is_noop() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, _status) = manager(connector);
        mgr.reconnect();
        mgr.disconnect();
        assert_eq!(mgr.epoch(), 0);
    }

    #[tokio::test]
    async fn stale_close_is_ignored() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, status) = manager(connector);
        let _opened = mgr.connect();
        let _opened = mgr.connect();

        assert!(!mgr.on_closed(1, None));
        assert!(mgr.is_current(2));
        assert_eq!(*status.borrow(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn entering_connected_resets_ids_and_ping_flag() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, _status) = manager(connector);

        assert_eq!(mgr.next_id(), 1);
        assert_eq!(mgr.next_id(), 2);
        mgr.set_ping_outstanding(true);

        mgr.set_status(ConnectionStatus::Connected);
        assert_eq!(mgr.next_id(), 1);
        assert!(!mgr.ping_outstanding);

        // Other transitions leave the counter alone.
        mgr.set_status(ConnectionStatus::Ready);
        assert_eq!(mgr.next_id(), 2);
    }

    #[tokio::test]
    async fn caller_ids_push_the_counter_forward() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, _status) = manager(connector);

        mgr.reserve_id(10);
        assert_eq!(mgr.next_id(), 11);
        mgr.reserve_id(3);
        assert_eq!(mgr.next_id(), 12);

        mgr.reserve_id(MAX_REQUEST_ID);
        assert_eq!(mgr.next_id(), MAX_REQUEST_ID + 1);
        mgr.reserve_id(u64::MAX);
        assert_eq!(mgr.next_id(), u64::MAX);
        assert_eq!(mgr.next_id(), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_due_only_when_silent_and_authenticated() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, _status) = manager(connector);
        mgr.note_message();
        let interval = mgr.keepalive_interval;

        let later = Instant::now() + interval + Duration::from_millis(1);
        assert!(!mgr.keepalive_due(later), "not authenticated");

        mgr.set_status(ConnectionStatus::Ready);
        assert!(!mgr.keepalive_due(Instant::now()), "not silent long enough");
        assert!(mgr.keepalive_due(later));

        mgr.set_ping_outstanding(true);
        assert!(!mgr.keepalive_due(later), "ping already outstanding");
    }

    #[tokio::test]
    async fn shutdown_stops_retrying() {
        let (connector, _hub) = FakeConnector::new();
        let (mut mgr, _rx, status) = manager(connector);
        let _opened = mgr.connect();

        mgr.shutdown();
        assert!(!mgr.is_current(1));
        mgr.on_reconnect_due();
        assert_eq!(mgr.epoch(), 1);
        assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn transmit_without_transport_fails() {
        let (connector, _hub) = FakeConnector::new();
        let (mgr, _rx, _status) = manager(connector);
        assert!(matches!(
            mgr.transmit(&Request::ping()),
            Err(TransportError::Closed)
        ));
    }
}
