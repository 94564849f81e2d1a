//! Presence tracking for Relay.
//!
//! Joining and leaving go through here so that every registry change is
//! followed by a presence broadcast to every open connection.

use crate::connections::ConnectionTable;
use crate::error::RelayError;
use crate::message::{Identity, PresenceEvent};
use crate::metrics;
use crate::registry::{Registration, Registry};
use relay_protocol::{codec, Outbound, PresenceStatus};
use std::sync::Arc;
use tenvis_relay_transport::{ConnectionHandle, ConnectionId};
use tracing::{debug, error, info, warn};

/// Presence broadcaster.
#[derive(Debug)]
pub struct Presence {
    registry: Arc<Registry>,
    connections: Arc<ConnectionTable>,
}

impl Presence {
    /// Create a broadcaster over a registry and connection table.
    #[must_use]
    pub fn new(registry: Arc<Registry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Register `identity` on `handle`, acknowledge it, and announce it online.
    ///
    /// The acknowledgement is queued on the registering connection before the
    /// broadcast, so the client sees `registered` first.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionNotOpen`] if the handle is closed.
    pub fn join(&self, identity: &str, handle: &ConnectionHandle) -> Result<Registration, RelayError> {
        let registration = self.registry.register(identity, handle)?;
        metrics::record_registration(self.registry.len());

        if let Some(released) = &registration.released {
            self.announce(released, PresenceStatus::Offline);
        }

        let ack = Outbound::registered(identity, &registration.session_token, self.registry.snapshot());
        match codec::encode(&ack) {
            Ok(text) => {
                if let Err(e) = handle.send_text(text) {
                    warn!(identity = %identity, connection = %handle.id(), error = %e, "Failed to acknowledge registration");
                }
            }
            Err(e) => error!(identity = %identity, error = %e, "Failed to encode registration ack"),
        }

        info!(identity = %identity, session = %registration.session_token, "User registered");
        self.announce(identity, PresenceStatus::Online);
        Ok(registration)
    }

    /// Unregister whatever `connection_id` owns and announce it offline.
    ///
    /// Nothing is announced if the connection owned no identity, including
    /// when its identity was taken over by a newer registration.
    pub fn leave(&self, connection_id: &ConnectionId) -> Option<Identity> {
        let identity = self.registry.unregister(connection_id)?;
        metrics::set_online(self.registry.len());

        info!(identity = %identity, connection = %connection_id, "User disconnected");
        self.announce(&identity, PresenceStatus::Offline);
        Some(identity)
    }

    /// Broadcast a presence change with the current online snapshot.
    ///
    /// Best effort: a failed write to one connection is logged and skipped.
    /// Returns the number of connections the update was queued for.
    pub fn announce(&self, identity: &str, status: PresenceStatus) -> usize {
        let event = PresenceEvent::new(identity, status, self.registry.snapshot());
        let text = match codec::encode(&event.into_frame()) {
            Ok(text) => text,
            Err(e) => {
                error!(identity = %identity, error = %e, "Failed to encode presence update");
                metrics::record_error("encode");
                return 0;
            }
        };

        let mut delivered = 0;
        for handle in self.connections.open_handles() {
            match handle.send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection = %handle.id(), error = %e, "Skipping presence update");
                }
            }
        }

        metrics::record_presence_broadcast(status.as_str());
        info!(identity = %identity, status = %status, recipients = delivered, "Broadcasting presence update");
        delivered
    }
}
