//! Metrics collection and export for an arena node.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use arena_core::RouterListener;
use arena_protocol::{ChannelId, UserId};
use bytes::Bytes;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const USERS_TOTAL: &str = "arena_users_total";
    pub const USERS_ACTIVE: &str = "arena_users_active";
    pub const CHANNEL_JOINS_TOTAL: &str = "arena_channel_joins_total";
    pub const CHANNEL_MESSAGES_TOTAL: &str = "arena_channel_messages_total";
    pub const CHANNEL_MESSAGE_BYTES: &str = "arena_channel_message_bytes";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::USERS_TOTAL,
        "Total number of users registered since node start"
    );
    metrics::describe_gauge!(names::USERS_ACTIVE, "Current number of registered users");
    metrics::describe_counter!(
        names::CHANNEL_JOINS_TOTAL,
        "Total number of channel joins by local users"
    );
    metrics::describe_counter!(
        names::CHANNEL_MESSAGES_TOTAL,
        "Total number of payloads submitted to channels on this node"
    );
    metrics::describe_counter!(
        names::CHANNEL_MESSAGE_BYTES,
        "Total payload bytes submitted to channels on this node"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Router listener that turns routing events into metrics.
pub struct MetricsListener;

impl RouterListener for MetricsListener {
    fn user_joined(&self, _user: UserId) {
        counter!(names::USERS_TOTAL).increment(1);
        gauge!(names::USERS_ACTIVE).increment(1.0);
    }

    fn user_left(&self, _user: UserId) {
        gauge!(names::USERS_ACTIVE).decrement(1.0);
    }

    fn user_joined_channel(&self, _user: UserId, _channel: ChannelId) {
        counter!(names::CHANNEL_JOINS_TOTAL).increment(1);
    }

    fn channel_data(&self, _channel: ChannelId, _from: UserId, payload: &Bytes, reliable: bool) {
        let mode = if reliable { "reliable" } else { "unreliable" };
        counter!(names::CHANNEL_MESSAGES_TOTAL, "mode" => mode).increment(1);
        counter!(names::CHANNEL_MESSAGE_BYTES, "mode" => mode).increment(payload.len() as u64);
    }
}
