//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; whichever recorder the
//! binary installs (Prometheus in the server) picks these up.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const REGISTRATIONS_TOTAL: &str = "relay_registrations_total";
    pub const ONLINE_IDENTITIES: &str = "relay_online_identities";
    pub const PRESENCE_BROADCASTS_TOTAL: &str = "relay_presence_broadcasts_total";
    pub const ROUTED_MESSAGES_TOTAL: &str = "relay_routed_messages_total";
    pub const PROBES_TOTAL: &str = "relay_probes_total";
    pub const EVICTIONS_TOTAL: &str = "relay_evictions_total";
    pub const DROPPED_FRAMES_TOTAL: &str = "relay_dropped_frames_total";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Record a newly attached connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a detached connection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a registration and the resulting online count.
pub fn record_registration(online: usize) {
    counter!(names::REGISTRATIONS_TOTAL).increment(1);
    set_online(online);
}

/// Update the online identity gauge.
pub fn set_online(online: usize) {
    gauge!(names::ONLINE_IDENTITIES).set(online as f64);
}

/// Record a presence broadcast.
pub fn record_presence_broadcast(status: &'static str) {
    counter!(names::PRESENCE_BROADCASTS_TOTAL, "status" => status).increment(1);
}

/// Record a routing outcome.
pub fn record_routed(outcome: &'static str) {
    counter!(names::ROUTED_MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record liveness probes sent in one round.
pub fn record_probes(count: usize) {
    counter!(names::PROBES_TOTAL).increment(count as u64);
}

/// Record an eviction by the liveness sweep.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record an inbound frame that was dropped.
pub fn record_dropped_frame(reason: &'static str) {
    counter!(names::DROPPED_FRAMES_TOTAL, "reason" => reason).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
