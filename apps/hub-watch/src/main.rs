//! hub-watch entry point.
//!
//! Connects to the hub and prints every event of the selected type as one
//! JSON line. Usage: `hub-watch [event_type]`.

mod config;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use hasslink_hub_connection::{HassClient, OpenOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting hub-watch");

    let mut config = config::WatchConfig::load()?;
    if let Some(event_type) = std::env::args().nth(1) {
        config.event_type = Some(event_type);
    }

    let (client, outcome) = HassClient::connect(config.hub).await?;
    if let OpenOutcome::Failed(reason) = outcome {
        tracing::warn!(%reason, "hub unreachable, retrying in the background");
    }

    let stream = client.select(config.event_type.as_deref()).await?;
    let mut events = stream.subscribe();
    tracing::info!(
        event_type = config.event_type.as_deref().unwrap_or("*"),
        "watching events"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output too slow, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}
