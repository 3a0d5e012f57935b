//! Channels bridge driver entrypoint.
//!
//! Glue only: logging, configuration, adapter wiring, ctrl-c shutdown. The
//! bus subscriber below just logs events; a control-surface entity layer
//! would subscribe in its place.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use channels_bridge::adapter::ChannelsAdapter;
use channels_bridge::bus::create_bus;
use channels_bridge::config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "channels_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Channels bridge");

    let config = config::load_config()?;
    tracing::info!(?config, "Configuration loaded");

    let bus = create_bus();

    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            tracing::info!(event_type = event.event_type(), ?event, "bus event");
        }
    });

    let adapter = ChannelsAdapter::new(bus);
    adapter.apply_config(&config).await?;
    adapter.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    adapter.stop().await;

    Ok(())
}
