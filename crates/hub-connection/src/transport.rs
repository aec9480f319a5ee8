//! WebSocket transport for one physical connection.
//!
//! A [`Transport`] owns the socket of a single connection epoch. It knows
//! nothing about the hub protocol beyond decoding frames: it reports
//! lifecycle signals (opened, message, errored, closed) into the
//! dispatch queue, each tagged with its epoch.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hasslink_protocol::Incoming;
use hasslink_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::dispatcher::Command;
use crate::error::TransportError;

/// Outbound half of a connected socket.
pub type WsSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of a connected socket.
pub type WsStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// Opens sockets. Swappable so the client can run over any duplex channel.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                    .await?;
            let (write, read) = ws_stream.split();
            let sink: WsSink = Box::pin(write);
            let stream: WsStream = Box::pin(read);
            Ok((sink, stream))
        })
    }
}

/// Lifecycle signal from a transport.
#[derive(Debug)]
pub(crate) struct TransportSignal {
    pub(crate) epoch: u64,
    pub(crate) kind: SignalKind,
}

#[derive(Debug)]
pub(crate) enum SignalKind {
    Opened,
    Message(Incoming),
    /// Precursor to `Closed`; never triggers reconnection on its own.
    Errored(String),
    /// Emitted exactly once per transport.
    Closed(Option<String>),
}

/// Posts a signal into the dispatch queue. Returns `false` once the
/// dispatcher is gone.
pub(crate) async fn emit(signals: &mpsc::Sender<Command>, epoch: u64, kind: SignalKind) -> bool {
    signals
        .send(Command::Transport(TransportSignal { epoch, kind }))
        .await
        .is_ok()
}

/// Capacity of the outbound frame queue.
const WRITE_QUEUE_CAPACITY: usize = 256;

/// One physical connection attempt.
pub(crate) struct Transport {
    epoch: u64,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    _run_handle: JoinHandle<()>,
}

impl Transport {
    /// Starts connecting in the background.
    ///
    /// Exactly one of `Opened` or `Errored` follows, and a single `Closed`
    /// ends the transport's life.
    pub(crate) fn open(
        epoch: u64,
        connector: Arc<dyn Connector>,
        url: String,
        signals: mpsc::Sender<Command>,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let run_handle = tokio::spawn(run(
            epoch,
            connector,
            url,
            write_tx.clone(),
            write_rx,
            signals,
            cancel.clone(),
        ));

        Self {
            epoch,
            write_tx,
            cancel,
            _run_handle: run_handle,
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queues a text frame without waiting for the socket.
    pub(crate) fn send_text(&self, text: String) -> Result<(), TransportError> {
        match self.write_tx.try_send(tungstenite::Message::Text(text.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(epoch = self.epoch, "outbound queue full, dropping frame");
                Err(TransportError::Closed)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Force-closes the socket. Idempotent; the `Closed` signal follows.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    epoch: u64,
    connector: Arc<dyn Connector>,
    url: String,
    write_tx: mpsc::Sender<tungstenite::Message>,
    write_rx: mpsc::Receiver<tungstenite::Message>,
    signals: mpsc::Sender<Command>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(epoch, "transport closed before opening");
            emit(&signals, epoch, SignalKind::Closed(Some("closed before open".into()))).await;
            return;
        }
        result = connector.connect(&url) => result,
    };

    let (sink, stream) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(epoch, url = %url, error = %e, "hub connection error");
            emit(&signals, epoch, SignalKind::Errored(e.to_string())).await;
            emit(&signals, epoch, SignalKind::Closed(None)).await;
            return;
        }
    };

    info!(epoch, url = %url, "hub connected");
    emit(&signals, epoch, SignalKind::Opened).await;

    let write_handle = tokio::spawn(crate::pumps::write::write_pump(
        sink,
        write_rx,
        epoch,
        cancel.clone(),
    ));

    let reason =
        crate::pumps::read::read_pump(stream, epoch, &signals, &write_tx, &cancel).await;

    cancel.cancel();
    let _ = write_handle.await;

    emit(&signals, epoch, SignalKind::Closed(reason)).await;
}
