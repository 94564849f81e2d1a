//! Connection registry.
//!
//! The registry is the single source of truth for who is online. It maps
//! each registered identity to the connection that currently owns it, and
//! each connection back to the identity it registered. Both maps live behind
//! one mutex so they can never disagree; the lock is only held for the
//! duration of a single operation and never across an `.await`.

use crate::error::RelayError;
use crate::message::{now_millis, Identity};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tenvis_relay_transport::{ConnectionHandle, ConnectionId};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// A registered identity and the connection that owns it.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Registered identity.
    pub identity: Identity,
    /// Handle to the owning connection.
    pub handle: ConnectionHandle,
    /// Opaque token issued at registration.
    pub session_token: String,
    /// When the identity registered (Unix ms).
    pub registered_at: u64,
    /// Last liveness response (Unix ms), for display.
    pub last_seen_at: u64,
    /// Last liveness response, for staleness checks.
    pub last_seen: Instant,
}

impl ConnectionRecord {
    /// Time since the last liveness response.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Check if the record has been silent for longer than `threshold`.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        self.idle_for(now) > threshold
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.last_seen_at = now_millis();
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Fresh session token.
    pub session_token: String,
    /// Connection that previously held this identity, if any. It stays open.
    pub superseded: Option<ConnectionId>,
    /// Identity this connection held before and gave up by re-registering.
    pub released: Option<Identity>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// identity -> record, in registration order.
    records: IndexMap<Identity, ConnectionRecord>,
    /// connection -> identity it currently owns.
    by_connection: HashMap<ConnectionId, Identity>,
}

/// The connection registry.
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` on the connection behind `handle`.
    ///
    /// Last registration wins: a previous record for the same identity is
    /// replaced, but its connection is left open. If this connection already
    /// owned a different identity, that identity is released.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionNotOpen`] if the handle is closed.
    pub fn register(
        &self,
        identity: &str,
        handle: &ConnectionHandle,
    ) -> Result<Registration, RelayError> {
        if !handle.is_open() {
            return Err(RelayError::ConnectionNotOpen {
                identity: identity.to_string(),
            });
        }

        let session_token = Uuid::new_v4().to_string();
        let now = now_millis();
        let record = ConnectionRecord {
            identity: identity.to_string(),
            handle: handle.clone(),
            session_token: session_token.clone(),
            registered_at: now,
            last_seen_at: now,
            last_seen: Instant::now(),
        };

        let mut state = self.state.lock();

        let released = match state.by_connection.get(handle.id()) {
            Some(previous) if previous != identity => {
                let previous = previous.clone();
                let owned = state
                    .records
                    .get(&previous)
                    .is_some_and(|r| r.handle.id() == handle.id());
                if owned {
                    state.records.shift_remove(&previous);
                    Some(previous)
                } else {
                    None
                }
            }
            _ => None,
        };

        let superseded = state
            .records
            .shift_remove(identity)
            .map(|old| old.handle.id().clone())
            .filter(|old| old != handle.id());
        if let Some(old) = &superseded {
            state.by_connection.remove(old);
        }

        state
            .by_connection
            .insert(handle.id().clone(), identity.to_string());
        state.records.insert(identity.to_string(), record);
        drop(state);

        if let Some(old) = &superseded {
            info!(identity = %identity, previous = %old, connection = %handle.id(), "Registration superseded");
        }
        debug!(identity = %identity, connection = %handle.id(), "Registered");

        Ok(Registration {
            session_token,
            superseded,
            released,
        })
    }

    /// Remove whatever identity `connection_id` owns.
    ///
    /// Idempotent. Returns the identity remembered at registration if this
    /// connection still owned it, `None` otherwise (never registered,
    /// already removed, or superseded by a newer registration).
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Identity> {
        let mut state = self.state.lock();
        let identity = state.by_connection.remove(connection_id)?;

        let owned = state
            .records
            .get(&identity)
            .is_some_and(|r| r.handle.id() == connection_id);
        if !owned {
            return None;
        }
        state.records.shift_remove(&identity);
        drop(state);

        debug!(identity = %identity, connection = %connection_id, "Unregistered");
        Some(identity)
    }

    /// Look up the record for an identity.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<ConnectionRecord> {
        self.state.lock().records.get(identity).cloned()
    }

    /// Update last-seen for an identity. Returns `false` if it is not registered.
    pub fn touch(&self, identity: &str) -> bool {
        match self.state.lock().records.get_mut(identity) {
            Some(record) => {
                record.touch();
                true
            }
            None => false,
        }
    }

    /// Update last-seen for whatever identity `connection_id` owns.
    pub fn touch_connection(&self, connection_id: &ConnectionId) -> Option<Identity> {
        let mut state = self.state.lock();
        let identity = state.by_connection.get(connection_id)?.clone();
        let record = state.records.get_mut(&identity)?;
        if record.handle.id() != connection_id {
            return None;
        }
        record.touch();
        Some(identity)
    }

    /// Identity owned by a connection, if any.
    #[must_use]
    pub fn identity_of(&self, connection_id: &ConnectionId) -> Option<Identity> {
        self.state.lock().by_connection.get(connection_id).cloned()
    }

    /// Online identities in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Identity> {
        self.state.lock().records.keys().cloned().collect()
    }

    /// Copies of every record, in registration order.
    #[must_use]
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.state.lock().records.values().cloned().collect()
    }

    /// Records silent for longer than `threshold`.
    #[must_use]
    pub fn stale(&self, threshold: Duration) -> Vec<ConnectionRecord> {
        let now = Instant::now();
        self.state
            .lock()
            .records
            .values()
            .filter(|r| r.is_stale(threshold, now))
            .cloned()
            .collect()
    }

    /// Check if an identity is registered.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.state.lock().records.contains_key(identity)
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Check if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenvis_relay_transport::Outbox;

    fn handle(id: &str) -> (ConnectionHandle, Outbox) {
        ConnectionHandle::new(id.into())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        let (alice, _outbox) = handle("conn-1");

        let registration = registry.register("alice", &alice).unwrap();
        assert!(registration.superseded.is_none());
        assert!(!registration.session_token.is_empty());

        let record = registry.lookup("alice").unwrap();
        assert_eq!(record.handle.id().as_str(), "conn-1");
        assert_eq!(record.session_token, registration.session_token);
        assert!(registry.is_online("alice"));
        assert_eq!(registry.identity_of(alice.id()).as_deref(), Some("alice"));
    }

    #[test]
    fn test_register_closed_handle() {
        let registry = Registry::new();
        let (dead, outbox) = handle("conn-1");
        drop(outbox);

        assert!(matches!(
            registry.register("alice", &dead),
            Err(RelayError::ConnectionNotOpen { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        let (first, _o1) = handle("conn-1");
        let (second, _o2) = handle("conn-2");

        let t1 = registry.register("alice", &first).unwrap().session_token;
        let registration = registry.register("alice", &second).unwrap();

        assert_ne!(t1, registration.session_token);
        assert_eq!(registration.superseded, Some(ConnectionId::from("conn-1")));
        assert_eq!(registry.snapshot(), vec!["alice".to_string()]);
        assert_eq!(registry.lookup("alice").unwrap().handle.id().as_str(), "conn-2");
        assert!(first.is_open(), "superseded connection is not closed");

        // The superseded connection no longer owns anything.
        assert_eq!(registry.unregister(first.id()), None);
        assert!(registry.is_online("alice"));

        assert_eq!(registry.unregister(second.id()).as_deref(), Some("alice"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_idempotent() {
        let registry = Registry::new();
        let (alice, _outbox) = handle("conn-1");
        registry.register("alice", &alice).unwrap();

        assert_eq!(registry.unregister(alice.id()).as_deref(), Some("alice"));
        assert_eq!(registry.unregister(alice.id()), None);
        assert_eq!(registry.unregister(&"never-seen".into()), None);
    }

    #[test]
    fn test_reregister_same_connection_new_identity() {
        let registry = Registry::new();
        let (conn, _outbox) = handle("conn-1");

        registry.register("alice", &conn).unwrap();
        let registration = registry.register("alicia", &conn).unwrap();

        assert_eq!(registration.released.as_deref(), Some("alice"));
        assert_eq!(registry.snapshot(), vec!["alicia".to_string()]);
        assert_eq!(registry.unregister(conn.id()).as_deref(), Some("alicia"));
    }

    #[test]
    fn test_reregister_same_connection_same_identity() {
        let registry = Registry::new();
        let (conn, _outbox) = handle("conn-1");

        registry.register("alice", &conn).unwrap();
        let registration = registry.register("alice", &conn).unwrap();

        assert!(registration.superseded.is_none());
        assert!(registration.released.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_order_and_uniqueness() {
        let registry = Registry::new();
        let handles: Vec<_> = (0..4).map(|i| handle(&format!("conn-{i}"))).collect();

        registry.register("carol", &handles[0].0).unwrap();
        registry.register("alice", &handles[1].0).unwrap();
        registry.register("bob", &handles[2].0).unwrap();
        registry.register("alice", &handles[3].0).unwrap();
        registry.unregister(handles[0].0.id());

        assert_eq!(registry.snapshot(), vec!["bob".to_string(), "alice".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_and_stale() {
        let registry = Registry::new();
        let (alice, _o1) = handle("conn-1");
        let (bob, _o2) = handle("conn-2");
        registry.register("alice", &alice).unwrap();
        registry.register("bob", &bob).unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(registry.touch("alice"));
        assert!(!registry.touch("nobody"));

        tokio::time::advance(Duration::from_secs(30)).await;
        let stale: Vec<_> = registry
            .stale(Duration::from_secs(65))
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(stale, vec!["bob".to_string()]);

        assert_eq!(registry.touch_connection(bob.id()).as_deref(), Some("bob"));
        assert!(registry.stale(Duration::from_secs(65)).is_empty());
    }

    #[test]
    fn test_touch_connection_ignores_superseded() {
        let registry = Registry::new();
        let (first, _o1) = handle("conn-1");
        let (second, _o2) = handle("conn-2");
        registry.register("alice", &first).unwrap();
        registry.register("alice", &second).unwrap();

        assert_eq!(registry.touch_connection(first.id()), None);
        assert_eq!(registry.touch_connection(second.id()).as_deref(), Some("alice"));
    }
}
