//! WebSocket write pump: serialises outbound frames onto the socket.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Writes queued frames to the socket until cancelled, the queue closes,
/// or a write fails. Sends a close frame on the way out.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    epoch: u64,
    cancel: CancellationToken,
) where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let tungstenite::Message::Text(ref text) = msg {
                    trace!(epoch, frame = %text.as_str(), "sending to hub");
                }
                if let Err(e) = write.send(msg).await {
                    error!(epoch, "WebSocket write error: {e}");
                    // Unblock the read side so the transport reports Closed.
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
