//! Request/response correlation.
//!
//! Every correlated request is parked here under its connection epoch and
//! id until a `result` (or `pong`) with the same id arrives, its timeout
//! fires, or its connection is torn down. Each entry is settled exactly
//! once: whichever of those happens first removes it from the map.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::trace;

use hasslink_protocol::ResultMessage;

use crate::dispatcher::Command;

/// Who is waiting for a result.
#[derive(Debug)]
pub(crate) enum Responder {
    /// A `send` caller.
    Caller(oneshot::Sender<ResultMessage>),
    /// The keepalive ping.
    Keepalive,
    /// A `subscribe_events` issued for the given event type.
    Subscription(Option<String>),
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) id: u64,
    pub(crate) epoch: u64,
    pub(crate) responder: Responder,
    timer: AbortHandle,
}

/// Pending requests keyed by `(epoch, id)`.
///
/// Ids restart at 1 on every connection, so the epoch is part of the key:
/// a late `result` can never settle a request of another connection.
pub(crate) struct Correlator {
    pending: HashMap<(u64, u64), PendingRequest>,
    timeout: Duration,
    signals: mpsc::Sender<Command>,
}

impl Correlator {
    pub(crate) fn new(timeout: Duration, signals: mpsc::Sender<Command>) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            signals,
        }
    }

    /// Parks a request and starts its timeout.
    ///
    /// Hands the responder back if the id is already pending on this
    /// connection.
    pub(crate) fn register(
        &mut self,
        epoch: u64,
        id: u64,
        responder: Responder,
    ) -> Result<(), Responder> {
        if self.pending.contains_key(&(epoch, id)) {
            return Err(responder);
        }

        let signals = self.signals.clone();
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = signals.send(Command::RequestTimeout { epoch, id }).await;
        })
        .abort_handle();

        trace!(epoch, id, "request pending");
        self.pending.insert(
            (epoch, id),
            PendingRequest {
                id,
                epoch,
                responder,
                timer,
            },
        );
        Ok(())
    }

    /// Removes the request answered by a `result`. `None` for unknown or
    /// already settled ids.
    pub(crate) fn resolve(&mut self, epoch: u64, id: u64) -> Option<PendingRequest> {
        let request = self.pending.remove(&(epoch, id))?;
        request.timer.abort();
        Some(request)
    }

    /// Removes a request whose timer fired. `None` if it was settled in
    /// the meantime.
    pub(crate) fn expire(&mut self, epoch: u64, id: u64) -> Option<PendingRequest> {
        self.pending.remove(&(epoch, id))
    }

    /// Removes every request of one connection.
    pub(crate) fn drain_epoch(&mut self, epoch: u64) -> Vec<PendingRequest> {
        let keys: Vec<_> = self
            .pending
            .keys()
            .filter(|(e, _)| *e == epoch)
            .copied()
            .collect();
        let mut drained: Vec<_> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect();
        drained.sort_by_key(|r| r.id);
        for request in &drained {
            request.timer.abort();
        }
        drained
    }

    /// Removes every request.
    pub(crate) fn drain_all(&mut self) -> Vec<PendingRequest> {
        let mut drained: Vec<_> = self.pending.drain().map(|(_, r)| r).collect();
        drained.sort_by_key(|r| (r.epoch, r.id));
        for request in &drained {
            request.timer.abort();
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
