//! WebSocket read pump: decodes frames into dispatch signals.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use hasslink_protocol::Incoming;
use hasslink_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::dispatcher::Command;
use crate::transport::{SignalKind, emit};

/// Reads frames until the socket ends, errors, sends a close frame, or
/// the transport is cancelled. Returns the close reason, if any.
///
/// Socket errors are reported as `Errored` before returning; the caller
/// follows up with the single `Closed` signal.
pub(crate) async fn read_pump<S>(
    mut read: S,
    epoch: u64,
    signals: &mpsc::Sender<Command>,
    write_tx: &mpsc::Sender<tungstenite::Message>,
    cancel: &CancellationToken,
) -> Option<String>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Some("closed locally".into()),

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let Some(incoming) = decode_text(&text) else { continue };
                        if !emit(signals, epoch, SignalKind::Message(incoming)).await {
                            return Some("dispatcher stopped".into());
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!(epoch, "received ping frame, sending pong");
                        let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(epoch, ?frame, "received close frame");
                        return frame.map(|f| f.reason.as_str().to_owned());
                    }
                    Some(Ok(_)) => {} // Binary and pong frames.
                    Some(Err(e)) => {
                        warn!(epoch, "WebSocket read error: {e}");
                        emit(signals, epoch, SignalKind::Errored(e.to_string())).await;
                        return Some(e.to_string());
                    }
                    None => {
                        debug!(epoch, "WebSocket stream ended");
                        return None;
                    }
                }
            }
        }
    }
}

/// Decodes one text frame; malformed or oversized frames are dropped.
fn decode_text(text: &str) -> Option<Incoming> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    match Incoming::parse(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("failed to parse message: {e}");
            None
        }
    }
}
