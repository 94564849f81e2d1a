//! Metrics export for Relay.
//!
//! The core crate records through the `metrics` facade; this module
//! describes those metrics and exports them in Prometheus format.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::metrics::names;
use tracing::info;

/// Describe every metric the relay records.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::REGISTRATIONS_TOTAL, "Total number of registrations");
    metrics::describe_gauge!(names::ONLINE_IDENTITIES, "Current number of online identities");
    metrics::describe_counter!(
        names::PRESENCE_BROADCASTS_TOTAL,
        "Presence updates broadcast, by status"
    );
    metrics::describe_counter!(
        names::ROUTED_MESSAGES_TOTAL,
        "Addressed messages routed, by outcome"
    );
    metrics::describe_counter!(names::PROBES_TOTAL, "Liveness probes sent");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Connections evicted as stale");
    metrics::describe_counter!(
        names::DROPPED_FRAMES_TOTAL,
        "Inbound frames dropped, by reason"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
