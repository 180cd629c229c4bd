//! # Arena Node
//!
//! Session and channel routing node for an arena deployment.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! arena
//!
//! # Run with custom config
//! ARENA_CONFIG=/path/to/arena.toml arena
//!
//! # Run with environment variables
//! ARENA_NODE_NAME=arena-eu-1 ARENA_KEY_TTL_SECS=60 arena
//! ```

mod config;
mod metrics;

use anyhow::Result;
use arena_core::{ChannelRouter, PresenceGossip};
use arena_transport::LoopbackHub;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(node = %config.node_name, "Starting arena node");

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        metrics::start_metrics_server(config.metrics.port)?;
    }

    // Wire the routing layer onto the interconnect
    let hub = Arc::new(LoopbackHub::new());
    let router = ChannelRouter::new(hub.clone(), config.router_config())?;
    router.add_listener(Arc::new(metrics::MetricsListener));
    let rotation = router.start_key_rotation();

    let gossip = PresenceGossip::new(hub, config.gossip_config())?;
    let renewal = gossip.start();

    tracing::info!("Node ready");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    rotation.abort();
    renewal.abort();
    router.shutdown();

    Ok(())
}
