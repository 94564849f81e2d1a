//! Liveness monitor.
//!
//! Two independent timers keep the registry honest about sockets that died
//! without a close frame:
//!
//! - **probe** sends a ping to every open connection and moves on;
//! - **sweep** closes every registered connection whose last pong is older
//!   than the staleness threshold.
//!
//! A pong only touches last-seen; it never causes a broadcast.

use crate::connections::ConnectionTable;
use crate::error::RelayError;
use crate::message::Identity;
use crate::metrics;
use crate::presence::Presence;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often every connection is pinged.
    pub probe_interval: Duration,
    /// How often records are checked for staleness.
    pub sweep_interval: Duration,
    /// Silence after which a record is evicted.
    pub stale_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(35),
            stale_after: Duration::from_secs(65),
        }
    }
}

/// The liveness monitor.
#[derive(Debug)]
pub struct LivenessMonitor {
    registry: Arc<Registry>,
    connections: Arc<ConnectionTable>,
    presence: Arc<Presence>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        connections: Arc<ConnectionTable>,
        presence: Arc<Presence>,
        config: LivenessConfig,
    ) -> Self {
        Self {
            registry,
            connections,
            presence,
            config,
        }
    }

    /// The monitor's timing.
    #[must_use]
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Ping every open connection. Returns how many probes were queued.
    pub fn probe(&self) -> usize {
        let mut sent = 0;
        for handle in self.connections.open_handles() {
            if handle.ping().is_ok() {
                sent += 1;
            }
        }
        metrics::record_probes(sent);
        debug!(probes = sent, "Liveness probe round");
        sent
    }

    /// Close every registered connection that has been silent too long and
    /// release its record.
    ///
    /// The release does not wait for the session: a session stuck writing to
    /// a dead peer would otherwise keep the identity online. The session's
    /// own unregister later finds nothing to remove, so exactly one offline
    /// update goes out. Returns the evicted identities.
    pub fn sweep(&self) -> Vec<Identity> {
        let now = Instant::now();
        let stale = self.registry.stale(self.config.stale_after);

        let mut evicted = Vec::with_capacity(stale.len());
        for record in stale {
            let reason = RelayError::ProbeTimeout {
                identity: record.identity.clone(),
                elapsed_ms: record.idle_for(now).as_millis() as u64,
            };
            warn!(connection = %record.handle.id(), error = %reason, "Evicting stale connection");

            record.handle.close();
            self.presence.leave(record.handle.id());
            metrics::record_eviction();
            evicted.push(record.identity);
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), identities = ?evicted, "Cleaning up stale connections");
        }
        evicted
    }

    /// Start the probe and sweep timers.
    ///
    /// Both stop when `shutdown` is cancelled. The first probe fires one
    /// interval after start, not immediately.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> (JoinHandle<()>, JoinHandle<()>) {
        let probe = tokio::spawn(self.clone().run_probe(shutdown.clone()));
        let sweep = tokio::spawn(self.clone().run_sweep(shutdown));
        (probe, sweep)
    }

    /// Probe timer loop.
    pub async fn run_probe(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.probe_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe();
                }
                () = shutdown.cancelled() => break,
            }
        }
        debug!("Liveness probe stopped");
    }

    /// Sweep timer loop.
    pub async fn run_sweep(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                () = shutdown.cancelled() => break,
            }
        }
        debug!("Liveness sweep stopped");
    }
}
