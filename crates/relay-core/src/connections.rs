//! Table of every open connection, registered or not.

use dashmap::DashMap;
use tenvis_relay_transport::{ConnectionHandle, ConnectionId};

/// Open connections indexed by ID.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    handles: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub fn insert(&self, handle: ConnectionHandle) {
        self.handles.insert(handle.id().clone(), handle);
    }

    /// Stop tracking a connection. Returns `true` if it was tracked.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.handles.remove(connection_id).is_some()
    }

    /// Get a connection's handle.
    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        self.handles.get(connection_id).map(|h| h.clone())
    }

    /// Handles of every tracked connection that is still open.
    ///
    /// Collected up front so no shard lock is held while callers write.
    #[must_use]
    pub fn open_handles(&self) -> Vec<ConnectionHandle> {
        self.handles
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Ask every tracked connection to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> =
            self.handles.iter().map(|e| e.value().clone()).collect();
        for handle in &handles {
            handle.close();
        }
        handles.len()
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if no connection is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
