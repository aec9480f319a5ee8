//! Keepalive pump: periodic ticks into the dispatch queue.
//!
//! The pump only keeps time. Whether a ping is actually due (status,
//! silence, outstanding ping) is decided by the dispatcher.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Command;

/// Posts a [`Command::KeepaliveTick`] every `period` until cancelled or
/// the dispatcher goes away.
pub(crate) async fn keepalive_pump(
    commands: mpsc::Sender<Command>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if commands.send(Command::KeepaliveTick).await.is_err() {
                    break;
                }
            }
        }
    }
}
