//! Persistent connection to a home-automation hub's real-time API.
//!
//! Provides the WebSocket transport, the authentication handshake,
//! request/response correlation with timeouts, and event subscriptions
//! that survive reconnects. [`HassClient`] is the entry point.

mod auth;
pub mod client;
pub mod config;
mod correlator;
mod dispatcher;
pub mod error;
mod events;
mod manager;
pub(crate) mod pumps;
pub mod readiness;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testutil;

pub use client::HassClient;
pub use config::HassConfig;
pub use error::{ConfigError, HassError, TransportError};
pub use readiness::{FetchStates, NoReadiness, Readiness};
pub use transport::{Connector, TungsteniteConnector, WsSink, WsStream};
pub use types::{ConnectionStatus, EventStream, OpenOutcome};
