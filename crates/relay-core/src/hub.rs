//! The relay hub: shared state and the components that act on it.
//!
//! One [`Hub`] is built per server. Sessions attach to it on connect, send
//! their inbound frames through it, and detach from it when they end.

use crate::channel::ChannelScheme;
use crate::connections::ConnectionTable;
use crate::error::RelayError;
use crate::liveness::{LivenessConfig, LivenessMonitor};
use crate::message::Identity;
use crate::metrics;
use crate::presence::Presence;
use crate::registry::{Registration, Registry};
use crate::router::{Delivery, MessageRouter};
use crate::session::Session;
use relay_protocol::{codec::MAX_FRAME_SIZE, Envelope, FrameCodec};
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_transport::{Connection, ConnectionHandle, ConnectionId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Probe and sweep timing.
    pub liveness: LivenessConfig,
    /// Direct-user channel naming.
    pub scheme: ChannelScheme,
    /// Largest inbound frame accepted.
    pub max_frame_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessConfig::default(),
            scheme: ChannelScheme::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Shared relay state.
#[derive(Debug)]
pub struct Hub {
    registry: Arc<Registry>,
    connections: Arc<ConnectionTable>,
    presence: Arc<Presence>,
    router: MessageRouter,
    liveness: Arc<LivenessMonitor>,
    codec: FrameCodec,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Hub {
    /// Build a hub. Liveness timers are not started until
    /// [`Hub::start_liveness`].
    #[must_use]
    pub fn new(config: HubConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let connections = Arc::new(ConnectionTable::new());
        let presence = Arc::new(Presence::new(registry.clone(), connections.clone()));
        let router = MessageRouter::new(registry.clone(), presence.clone(), config.scheme);
        let liveness = Arc::new(LivenessMonitor::new(
            registry.clone(),
            connections.clone(),
            presence.clone(),
            config.liveness,
        ));

        Arc::new(Self {
            registry,
            connections,
            presence,
            router,
            liveness,
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Every open connection, registered or not.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    /// The presence broadcaster.
    #[must_use]
    pub fn presence(&self) -> &Arc<Presence> {
        &self.presence
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// The liveness monitor.
    #[must_use]
    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }

    /// Frame codec sessions decode with.
    #[must_use]
    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    /// Track a newly opened connection.
    pub fn attach(&self, handle: ConnectionHandle) {
        debug!(connection = %handle.id(), "Connection attached");
        self.connections.insert(handle);
        metrics::record_connection();
    }

    /// Forget a closed connection and release its identity, if it still
    /// owns one. Returns the released identity.
    pub fn detach(&self, connection_id: &ConnectionId) -> Option<Identity> {
        if self.connections.remove(connection_id) {
            metrics::record_disconnection();
        }
        self.presence.leave(connection_id)
    }

    /// Register `identity` on a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionNotOpen`] if the handle is closed.
    pub fn register(&self, identity: &str, handle: &ConnectionHandle) -> Result<Registration, RelayError> {
        self.presence.join(identity, handle)
    }

    /// Route an envelope received on `origin`.
    ///
    /// # Errors
    ///
    /// See [`MessageRouter::route_envelope`].
    pub fn deliver(&self, origin: &ConnectionId, envelope: Envelope) -> Result<Delivery, RelayError> {
        self.router.route_envelope(origin, envelope)
    }

    /// Check whether an identity is registered.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.registry.is_online(identity)
    }

    /// Current online identities in registration order.
    #[must_use]
    pub fn online(&self) -> Vec<Identity> {
        self.registry.snapshot()
    }

    /// Record a liveness reply on a connection.
    pub fn touch(&self, connection_id: &ConnectionId) {
        if self.registry.touch_connection(connection_id).is_none() {
            debug!(connection = %connection_id, "Pong from unregistered connection");
        }
    }

    /// Attach an accepted connection and spawn its session.
    ///
    /// The connection is attached before this returns, so a shutdown that
    /// starts afterwards closes it. Returns `None` if the hub is already
    /// shutting down; the caller should refuse the connection.
    pub fn spawn_session<C>(self: &Arc<Self>, conn: C) -> Option<tokio::task::JoinHandle<()>>
    where
        C: Connection + 'static,
    {
        if self.is_shutting_down() {
            warn!(connection = %conn.id(), "Refusing connection during shutdown");
            return None;
        }
        let mut session = Session::new(self.clone(), conn);
        session.open();
        // Shutdown may have swept the table between the check and the attach.
        if self.is_shutting_down() {
            session.handle().close();
        }
        Some(self.tracker.spawn(async move {
            session.run().await;
        }))
    }

    /// Start the liveness timers. They stop on shutdown.
    ///
    /// Zero intervals cannot drive a timer; the monitor is then left off
    /// and an error is logged.
    pub fn start_liveness(&self) {
        let config = self.liveness.config();
        if config.probe_interval.is_zero() || config.sweep_interval.is_zero() {
            error!(
                probe_ms = config.probe_interval.as_millis() as u64,
                sweep_ms = config.sweep_interval.as_millis() as u64,
                "Liveness intervals must be non-zero; monitor not started"
            );
            return;
        }
        let monitor = self.liveness.clone();
        let token = self.shutdown.child_token();
        self.tracker.spawn(monitor.clone().run_probe(token.clone()));
        self.tracker.spawn(monitor.run_sweep(token));
        info!(
            probe_ms = self.liveness.config().probe_interval.as_millis() as u64,
            sweep_ms = self.liveness.config().sweep_interval.as_millis() as u64,
            stale_ms = self.liveness.config().stale_after.as_millis() as u64,
            "Liveness monitor started"
        );
    }

    /// Check if shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting sessions, stop the timers, close every connection,
    /// and wait up to `grace` for sessions to finish.
    ///
    /// Returns `true` if every task finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let closing = self.connections.close_all();
        info!(connections = closing, "Closing all connections");

        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if finished {
            info!("All sessions finished");
        } else {
            warn!(remaining = self.tracker.len(), "Grace period elapsed with sessions still running");
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{Outbound, PresenceStatus};
    use tenvis_relay_transport::memory::{self, MemoryPeer};

    fn hub() -> Arc<Hub> {
        Hub::new(HubConfig::default())
    }

    async fn next_frame(peer: &mut MemoryPeer) -> Outbound {
        let text = peer.next_text().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn register(hub: &Arc<Hub>, id: &str, identity: &str) -> MemoryPeer {
        let (conn, mut peer) = memory::pair(id);
        hub.spawn_session(conn).unwrap();
        peer.send_text(format!(r#"{{"type":"register","username":"{identity}"}}"#));
        assert!(matches!(next_frame(&mut peer).await, Outbound::Registered { .. }));
        assert!(matches!(next_frame(&mut peer).await, Outbound::PresenceUpdate { .. }));
        peer
    }

    #[tokio::test]
    async fn test_register_and_route() {
        let hub = hub();
        let mut alice = register(&hub, "conn-a", "alice").await;
        let mut bob = register(&hub, "conn-b", "bob").await;

        let Outbound::PresenceUpdate { changed, users } = next_frame(&mut alice).await else {
            panic!("expected presence update");
        };
        assert_eq!(changed.username, "bob");
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);

        alice.send_text(
            r#"{"event":"chat.message","channel":"chat.user.bob","data":{"user":"alice","messageId":"m1","text":"hi"}}"#,
        );

        let Outbound::Message(envelope) = next_frame(&mut bob).await else {
            panic!("expected forwarded message");
        };
        assert_eq!(envelope.channel, "chat.user.bob");
        assert_eq!(
            next_frame(&mut alice).await,
            Outbound::delivery_status("bob", true, Some(serde_json::json!("m1")))
        );
    }

    #[tokio::test]
    async fn test_online_query() {
        let hub = hub();
        let mut alice = register(&hub, "conn-a", "alice").await;

        alice.send_text(r#"{"type":"is_online_request","username":"alice"}"#);
        assert_eq!(next_frame(&mut alice).await, Outbound::online_response("alice", true));

        alice.send_text(r#"{"type":"is_online_request","username":"zed"}"#);
        assert_eq!(next_frame(&mut alice).await, Outbound::online_response("zed", false));
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_connection_open() {
        let hub = hub();
        let mut alice = register(&hub, "conn-a", "alice").await;

        alice.send_text("not json");
        alice.send_text(r#"{"hello":"world"}"#);
        alice.send_text(r#"{"type":"is_online_request","username":"alice"}"#);

        assert_eq!(next_frame(&mut alice).await, Outbound::online_response("alice", true));
        assert!(hub.is_online("alice"));
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_offline() {
        let hub = hub();
        let alice = register(&hub, "conn-a", "alice").await;
        let mut bob = register(&hub, "conn-b", "bob").await;

        drop(alice);

        let Outbound::PresenceUpdate { changed, users } = next_frame(&mut bob).await else {
            panic!("expected presence update");
        };
        assert_eq!(changed.username, "alice");
        assert_eq!(changed.status, PresenceStatus::Offline);
        assert_eq!(users, vec!["bob".to_string()]);
        assert_eq!(hub.online(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_error_unregisters() {
        let hub = hub();
        let alice = register(&hub, "conn-a", "alice").await;
        let mut bob = register(&hub, "conn-b", "bob").await;

        alice.fail("connection reset");

        let Outbound::PresenceUpdate { changed, .. } = next_frame(&mut bob).await else {
            panic!("expected presence update");
        };
        assert_eq!(changed.username, "alice");
        assert_eq!(changed.status, PresenceStatus::Offline);
        assert!(!hub.is_online("alice"));
    }

    #[tokio::test]
    async fn test_superseded_connection_closes_silently() {
        let hub = hub();
        let first = register(&hub, "conn-1", "alice").await;
        let mut watcher = register(&hub, "conn-w", "watcher").await;
        let _second = register(&hub, "conn-2", "alice").await;

        // Online update for the second alice registration.
        let Outbound::PresenceUpdate { changed, .. } = next_frame(&mut watcher).await else {
            panic!("expected presence update");
        };
        assert_eq!(changed.status, PresenceStatus::Online);

        drop(first);
        watcher.send_text(r#"{"type":"is_online_request","username":"alice"}"#);
        assert_eq!(next_frame(&mut watcher).await, Outbound::online_response("alice", true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_evicted_once() {
        let hub = hub();
        hub.start_liveness();
        let mut alice = register(&hub, "conn-a", "alice").await;
        let mut bob = register(&hub, "conn-b", "bob").await;
        let _ = next_frame(&mut alice).await;

        // Bob answers every probe, alice never does.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(106);
        let mut offline = Vec::new();
        while tokio::time::Instant::now() < deadline {
            tokio::select! {
                message = bob.next() => match message {
                    Some(tenvis_relay_transport::Outgoing::Ping) => bob.pong(),
                    Some(tenvis_relay_transport::Outgoing::Text(text)) => {
                        let frame: Outbound = serde_json::from_str(&text).unwrap();
                        if let Outbound::PresenceUpdate { changed, .. } = frame {
                            if changed.status == PresenceStatus::Offline {
                                offline.push(changed.username);
                            }
                        }
                    }
                    _ => break,
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        assert_eq!(offline, vec!["alice".to_string()]);
        assert!(!hub.is_online("alice"));
        assert!(hub.is_online("bob"));
        drop(alice);
    }

    #[tokio::test]
    async fn test_spawned_session_is_attached_immediately() {
        let hub = hub();
        let (conn, mut peer) = memory::pair("conn-a");
        hub.spawn_session(conn).unwrap();
        assert_eq!(hub.connections().len(), 1);

        // Shutdown before the session task has been polled still closes it.
        assert!(hub.shutdown(Duration::from_secs(5)).await);
        assert_eq!(peer.next_text().await, None);
        assert!(hub.connections().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_leaves_liveness_off() {
        let hub = Hub::new(HubConfig {
            liveness: LivenessConfig {
                probe_interval: Duration::ZERO,
                ..LivenessConfig::default()
            },
            ..HubConfig::default()
        });
        hub.start_liveness();
        assert!(hub.tracker.is_empty());
        assert!(hub.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions_and_refuses_new_ones() {
        let hub = hub();
        hub.start_liveness();
        let mut alice = register(&hub, "conn-a", "alice").await;

        assert!(hub.shutdown(Duration::from_secs(5)).await);
        assert!(hub.is_shutting_down());
        assert_eq!(alice.next_text().await, None);
        assert!(hub.connections().is_empty());

        let (conn, _peer) = memory::pair("conn-late");
        assert!(hub.spawn_session(conn).is_none());
    }
}
