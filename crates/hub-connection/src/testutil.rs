//! In-memory hub for tests.
//!
//! [`FakeConnector`] hands the client one end of a pair of channels per
//! connection attempt; the test drives the other end through [`FakeHub`]
//! and [`HubConn`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::error::TransportError;
use crate::transport::{Connector, WsSink, WsStream};

type Frame = Result<tungstenite::Message, tungstenite::Error>;

#[derive(Clone)]
pub(crate) struct FakeConnector {
    accepts: mpsc::UnboundedSender<HubConn>,
    failures: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Self, FakeHub) {
        let (accepts, incoming) = mpsc::unbounded_channel();
        let connector = Self {
            accepts,
            failures: Arc::new(AtomicUsize::new(0)),
        };
        (connector, FakeHub { incoming })
    }

    /// Makes the next `n` connect attempts fail.
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<(WsSink, WsStream), TransportError>> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Box::pin(async {
                Err(TransportError::Ws(tungstenite::Error::ConnectionClosed))
            });
        }

        let (to_hub, from_client) = mpsc::unbounded_channel::<tungstenite::Message>();
        let (to_client, from_hub) = mpsc::unbounded_channel::<Frame>();

        let sink: WsSink = Box::pin(sink::unfold(
            to_hub,
            |to_hub, msg: tungstenite::Message| async move {
                to_hub
                    .send(msg)
                    .map_err(|_| tungstenite::Error::ConnectionClosed)?;
                Ok::<_, tungstenite::Error>(to_hub)
            },
        ));
        let stream: WsStream = Box::pin(stream::unfold(from_hub, |mut from_hub| async move {
            from_hub.recv().await.map(|frame| (frame, from_hub))
        }));

        let _ = self.accepts.send(HubConn {
            from_client,
            to_client,
        });
        Box::pin(async move { Ok((sink, stream)) })
    }
}

pub(crate) struct FakeHub {
    incoming: mpsc::UnboundedReceiver<HubConn>,
}

impl FakeHub {
    /// Waits for the client's next connection.
    pub(crate) async fn accept(&mut self) -> HubConn {
        self.incoming.recv().await.expect("connector dropped")
    }
}

/// Hub side of one connection. Dropping it closes the connection.
pub(crate) struct HubConn {
    from_client: mpsc::UnboundedReceiver<tungstenite::Message>,
    to_client: mpsc::UnboundedSender<Frame>,
}

impl HubConn {
    /// Next JSON message from the client; `None` once it closes.
    pub(crate) async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.from_client.recv().await? {
                tungstenite::Message::Text(text) => {
                    return Some(serde_json::from_str(&text).expect("client sent invalid JSON"));
                }
                tungstenite::Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Like [`recv_json`](Self::recv_json) without waiting.
    pub(crate) fn try_recv_json(&mut self) -> Option<Value> {
        while let Ok(msg) = self.from_client.try_recv() {
            if let tungstenite::Message::Text(text) = msg {
                return Some(serde_json::from_str(&text).expect("client sent invalid JSON"));
            }
        }
        None
    }

    pub(crate) fn send_json(&self, value: Value) {
        let _ = self
            .to_client
            .send(Ok(tungstenite::Message::Text(value.to_string().into())));
    }
}

/// Runs the hub side of a successful authentication.
pub(crate) async fn handshake(conn: &mut HubConn) {
    conn.send_json(json!({"type": "auth_required", "ha_version": "2023.1"}));
    let auth = conn.recv_json().await.expect("no auth message");
    assert_eq!(auth["type"], "auth");
    conn.send_json(json!({"type": "auth_ok", "ha_version": "2023.1"}));
}
