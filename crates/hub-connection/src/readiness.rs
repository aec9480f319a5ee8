//! Readiness hook run between authentication and `Ready`.

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use hasslink_protocol::Request;

use crate::client::HassClient;

/// Work that must finish on every fresh connection before it is reported
/// `Ready` and event subscriptions are re-issued.
///
/// The future runs on its own task with a client handle, so it may issue
/// correlated requests. Its outcome is not inspected: the connection
/// becomes ready when the future completes, whatever happened inside.
pub trait Readiness: Send + Sync + 'static {
    fn fetch(&self, client: HassClient) -> BoxFuture<'static, ()>;
}

/// Default hook: loads the full state table with `get_states`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStates;

impl Readiness for FetchStates {
    fn fetch(&self, client: HassClient) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let result = client.send(Request::get_states()).await;
            if result.success {
                let count = result.result.as_array().map_or(0, Vec::len);
                debug!(entities = count, "fetched entity states");
            } else {
                warn!(error = ?result.error, "state fetch failed");
            }
        })
    }
}

/// Hook that completes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReadiness;

impl Readiness for NoReadiness {
    fn fetch(&self, _client: HassClient) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}
