//! Single dispatch loop.
//!
//! All protocol state lives in one [`Dispatcher`] owned by one task.
//! Socket signals, timer expiries and API calls all arrive as [`Command`]s
//! on one queue and are handled to completion one at a time, so none of
//! the maps below ever see concurrent access. Handlers never await: work
//! that has to wait (timers, the readiness hook) runs on its own task and
//! reports back through the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use hasslink_protocol::constants::MAX_REQUEST_ID;
use hasslink_protocol::{Incoming, Request, ResultMessage};

use crate::auth::AuthController;
use crate::client::HassClient;
use crate::config::HassConfig;
use crate::correlator::{Correlator, Responder};
use crate::events::EventSubscriptionRegistry;
use crate::manager::ConnectionManager;
use crate::pumps::keepalive::keepalive_pump;
use crate::readiness::Readiness;
use crate::transport::{Connector, SignalKind, TransportSignal};
use crate::types::{ConnectionStatus, EventStream, OpenOutcome};

/// Capacity of the dispatch queue.
pub(crate) const COMMAND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
pub(crate) enum Command {
    // API calls.
    Send {
        request: Request,
        reply: oneshot::Sender<ResultMessage>,
    },
    Select {
        event_type: Option<String>,
        reply: oneshot::Sender<EventStream>,
    },
    Reconnect,
    Disconnect,
    Shutdown {
        done: oneshot::Sender<()>,
    },

    // Internal signals.
    Transport(TransportSignal),
    RequestTimeout {
        epoch: u64,
        id: u64,
    },
    ReconnectDue,
    ReadinessComplete {
        epoch: u64,
    },
    KeepaliveTick,
}

pub(crate) struct Dispatcher {
    manager: ConnectionManager,
    correlator: Correlator,
    auth: AuthController,
    registry: EventSubscriptionRegistry,
    readiness: Arc<dyn Readiness>,
    client: HassClient,
    commands: mpsc::Sender<Command>,
    queue: mpsc::Receiver<Command>,
    keepalive_interval: Duration,
    keepalive_cancel: CancellationToken,
    cancel_pending_on_disconnect: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &HassConfig,
        connector: Arc<dyn Connector>,
        readiness: Arc<dyn Readiness>,
        client: HassClient,
        commands: mpsc::Sender<Command>,
        queue: mpsc::Receiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
        version_tx: watch::Sender<Option<String>>,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(config, connector, commands.clone(), status_tx),
            correlator: Correlator::new(config.request_timeout(), commands.clone()),
            auth: AuthController::new(config.token.clone(), version_tx),
            registry: EventSubscriptionRegistry::new(config.event_buffer),
            readiness,
            client,
            commands,
            queue,
            keepalive_interval: config.keepalive_interval(),
            keepalive_cancel: CancellationToken::new(),
            cancel_pending_on_disconnect: config.cancel_pending_on_disconnect,
        }
    }

    /// Starts the keepalive and the first connection attempt.
    pub(crate) fn start(&mut self) -> oneshot::Receiver<OpenOutcome> {
        tokio::spawn(keepalive_pump(
            self.commands.clone(),
            self.keepalive_interval,
            self.keepalive_cancel.clone(),
        ));
        self.auth.reset();
        self.manager.connect()
    }

    /// Handles commands until shut down.
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.queue.recv().await {
            let stop = matches!(command, Command::Shutdown { .. });
            self.handle(command);
            if stop {
                break;
            }
        }
        debug!("dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Send { request, reply } => self.submit(request, Responder::Caller(reply)),
            Command::Select { event_type, reply } => {
                let stream = self.select(event_type);
                let _ = reply.send(stream);
            }
            Command::Reconnect => self.manager.reconnect(),
            Command::Disconnect => self.manager.disconnect(),
            Command::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
            Command::Transport(signal) => self.on_transport(signal),
            Command::RequestTimeout { epoch, id } => self.on_timeout(epoch, id),
            Command::ReconnectDue => self.manager.on_reconnect_due(),
            Command::ReadinessComplete { epoch } => self.on_readiness_complete(epoch),
            Command::KeepaliveTick => self.on_keepalive_tick(),
        }
    }

    fn on_transport(&mut self, signal: TransportSignal) {
        let TransportSignal { epoch, kind } = signal;
        match kind {
            SignalKind::Opened => self.manager.on_opened(epoch),
            SignalKind::Errored(error) => self.manager.on_errored(epoch, &error),
            SignalKind::Closed(reason) => {
                if !self.manager.on_closed(epoch, reason.as_deref()) {
                    return;
                }
                self.auth.reset();
                self.registry.clear_ids();
                if self.cancel_pending_on_disconnect {
                    for request in self.correlator.drain_epoch(epoch) {
                        let result = ResultMessage::connection_closed(request.id);
                        self.settle(request.responder, result);
                    }
                }
            }
            SignalKind::Message(message) => {
                if !self.manager.is_current(epoch) {
                    trace!(epoch, "dropping message from superseded transport");
                    return;
                }
                self.manager.note_message();
                self.on_message(epoch, message);
            }
        }
    }

    fn on_message(&mut self, epoch: u64, message: Incoming) {
        match message {
            Incoming::AuthRequired { ha_version } => {
                let Some(auth) = self.auth.on_auth_required(&ha_version) else {
                    return;
                };
                // The hub never answers `auth` with a result, so it is
                // written raw instead of going through the correlator.
                if let Err(e) = self.manager.transmit(&auth) {
                    warn!(epoch, error = %e, "failed to send auth");
                }
                self.manager.set_status(ConnectionStatus::Authenticating);
            }
            Incoming::AuthOk { ha_version } => {
                if self.auth.on_auth_ok(&ha_version) {
                    self.manager.set_status(ConnectionStatus::Connected);
                    self.spawn_readiness(epoch);
                }
            }
            Incoming::AuthInvalid { message } => {
                if self.auth.on_auth_invalid(&message) {
                    self.manager.disconnect();
                }
            }
            Incoming::Result(result) => {
                let id = result.id;
                self.respond(epoch, id, result);
            }
            Incoming::Pong { id } => self.respond(epoch, id, ResultMessage::pong(id)),
            Incoming::Event { id, event } => {
                self.registry.route(id, event);
            }
            Incoming::Unknown => trace!(epoch, "ignoring message of unknown type"),
        }
    }

    /// Settles the pending request answered by `result`. Late, duplicate
    /// and unknown responses are dropped.
    fn respond(&mut self, epoch: u64, id: u64, result: ResultMessage) {
        match self.correlator.resolve(epoch, id) {
            Some(request) => self.settle(request.responder, result),
            None => trace!(epoch, id, "dropping response for unknown request"),
        }
    }

    /// Sends a correlated request on the current connection.
    fn submit(&mut self, mut request: Request, responder: Responder) {
        if !self.manager.status().can_send() {
            debug!(status = ?self.manager.status(), "request while not connected");
            self.settle(responder, ResultMessage::not_connected());
            return;
        }

        // Id 0 counts as "no id": the hub rejects it.
        let id = match request.id {
            Some(id) if id > MAX_REQUEST_ID => {
                warn!(id, "request id out of range");
                self.settle(responder, ResultMessage::invalid_id(id));
                return;
            }
            Some(id) if id != 0 => {
                self.manager.reserve_id(id);
                id
            }
            _ => {
                let id = self.manager.next_id();
                request.id = Some(id);
                id
            }
        };

        let epoch = self.manager.epoch();
        if let Err(responder) = self.correlator.register(epoch, id, responder) {
            warn!(epoch, id, "request id already pending");
            self.settle(responder, ResultMessage::duplicate_id(id));
            return;
        }

        // A failed write leaves the request pending; its timeout (or the
        // close that follows) settles it.
        if let Err(e) = self.manager.transmit(&request) {
            warn!(epoch, id, error = %e, "failed to send request");
        }
    }

    fn settle(&mut self, responder: Responder, result: ResultMessage) {
        match responder {
            Responder::Caller(reply) => {
                let _ = reply.send(result);
            }
            Responder::Keepalive => {
                self.manager.set_ping_outstanding(false);
                if !result.success {
                    debug!(error = ?result.error, "keepalive ping failed");
                }
            }
            Responder::Subscription(event_type) => {
                let event_type = event_type.as_deref().unwrap_or("*");
                if result.success {
                    debug!(id = result.id, event_type, "subscribed to events");
                } else {
                    warn!(id = result.id, event_type, error = ?result.error, "event subscription failed");
                }
            }
        }
    }

    fn on_timeout(&mut self, epoch: u64, id: u64) {
        let Some(request) = self.correlator.expire(epoch, id) else {
            return;
        };
        warn!(epoch, id, "request timed out");
        // A timeout on the live connection means it is dead.
        if epoch == self.manager.epoch() {
            self.manager.reconnect();
        }
        self.settle(request.responder, ResultMessage::timeout(id));
    }

    fn spawn_readiness(&self, epoch: u64) {
        let fetch = self.readiness.fetch(self.client.clone());
        let commands = self.commands.clone();
        tokio::spawn(async move {
            fetch.await;
            let _ = commands.send(Command::ReadinessComplete { epoch }).await;
        });
    }

    fn on_readiness_complete(&mut self, epoch: u64) {
        if !self.manager.is_current(epoch)
            || self.manager.status() != ConnectionStatus::Connected
            || !self.auth.on_ready()
        {
            trace!(epoch, auth = ?self.auth.state(), "ignoring stale readiness completion");
            return;
        }
        self.manager.set_status(ConnectionStatus::Ready);
        self.resubscribe();
    }

    /// Re-issues every subscription on the new connection before any
    /// other command is handled.
    fn resubscribe(&mut self) {
        let manager = &mut self.manager;
        let requests = self.registry.resubscribe(|| manager.next_id());
        if !requests.is_empty() {
            info!(count = requests.len(), "re-subscribing to events");
        }
        for (event_type, request) in requests {
            self.submit(request, Responder::Subscription(event_type));
        }
    }

    fn select(&mut self, event_type: Option<String>) -> EventStream {
        let (stream, created) = self.registry.select(event_type.as_deref());
        // Below Ready the subscription goes out with the Ready transition,
        // even at `Connected` where requests are already accepted. Sending
        // it there too would subscribe twice once resubscribe runs.
        if created && self.manager.status() == ConnectionStatus::Ready {
            let id = self.manager.next_id();
            let request = self.registry.bind(event_type.clone(), id);
            self.submit(request, Responder::Subscription(event_type));
        }
        stream
    }

    fn on_keepalive_tick(&mut self) {
        if !self.manager.keepalive_due(Instant::now()) {
            return;
        }
        trace!(epoch = self.manager.epoch(), "connection silent, sending ping");
        self.manager.set_ping_outstanding(true);
        self.submit(Request::ping(), Responder::Keepalive);
    }

    fn shutdown(&mut self) {
        info!(
            pending = self.correlator.len(),
            streams = self.registry.len(),
            "shutting down hub client"
        );
        self.keepalive_cancel.cancel();
        self.manager.shutdown();
        for request in self.correlator.drain_all() {
            let result = ResultMessage::connection_closed(request.id);
            self.settle(request.responder, result);
        }
        self.queue.close();
    }
}
