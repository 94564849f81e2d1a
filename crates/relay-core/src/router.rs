//! Addressed message router for Relay.
//!
//! The router resolves a direct-user channel to a registered connection and
//! forwards the envelope there. Delivery is at most once: nothing is queued
//! for offline identities and nothing is retried.

use crate::channel::ChannelScheme;
use crate::error::RelayError;
use crate::message::RoutedMessage;
use crate::metrics;
use crate::presence::Presence;
use crate::registry::Registry;
use relay_protocol::{codec, Envelope, Outbound};
use std::sync::Arc;
use tenvis_relay_transport::{ConnectionHandle, ConnectionId};
use tracing::{debug, info, warn};

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identity the envelope was forwarded to.
    pub destination: String,
    /// Whether a delivery acknowledgement was queued for the sender.
    pub acknowledged: bool,
}

/// The addressed-delivery router.
#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<Registry>,
    presence: Arc<Presence>,
    scheme: ChannelScheme,
}

impl MessageRouter {
    /// Create a router.
    #[must_use]
    pub fn new(registry: Arc<Registry>, presence: Arc<Presence>, scheme: ChannelScheme) -> Self {
        Self {
            registry,
            presence,
            scheme,
        }
    }

    /// The channel scheme used to resolve destinations.
    #[must_use]
    pub fn scheme(&self) -> &ChannelScheme {
        &self.scheme
    }

    /// Route an envelope received on `origin`.
    ///
    /// The sender is the envelope's `data.user`, or else the identity
    /// registered on `origin`.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidChannel`] if the channel does not address a user
    /// (nothing is sent to anyone), [`RelayError::DestinationUnreachable`]
    /// if the user is not connected.
    pub fn route_envelope(&self, origin: &ConnectionId, envelope: Envelope) -> Result<Delivery, RelayError> {
        let destination = match self.scheme.destination(&envelope.channel) {
            Ok(destination) => destination.to_string(),
            Err(e) => {
                warn!(connection = %origin, channel = %envelope.channel, "Invalid channel format");
                metrics::record_routed("invalid_channel");
                return Err(e);
            }
        };

        let message = RoutedMessage::new(destination, envelope)
            .with_fallback_sender(self.registry.identity_of(origin));
        self.route(message)
    }

    /// Route one message to its destination.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DestinationUnreachable`] if the destination has
    /// no open connection; the sender is told with `delivered: false` and a
    /// stale record, if any, is evicted.
    pub fn route(&self, message: RoutedMessage) -> Result<Delivery, RelayError> {
        let text = codec::encode(&Outbound::forward(message.envelope.clone()))?;

        let forwarded = match self.registry.lookup(&message.destination) {
            Some(record) if record.handle.is_open() => match record.handle.send_text(text) {
                Ok(()) => true,
                Err(e) => {
                    debug!(identity = %message.destination, error = %e, "Forward raced with close");
                    self.evict(&record.handle);
                    false
                }
            },
            Some(record) => {
                self.evict(&record.handle);
                false
            }
            None => false,
        };

        if !forwarded {
            info!(
                sender = message.sender.as_deref().unwrap_or("-"),
                destination = %message.destination,
                "User not connected"
            );
            self.acknowledge(&message, false);
            metrics::record_routed("unreachable");
            return Err(RelayError::DestinationUnreachable(message.destination));
        }

        debug!(
            sender = message.sender.as_deref().unwrap_or("-"),
            destination = %message.destination,
            "Message delivered"
        );
        let acknowledged = self.acknowledge(&message, true);
        metrics::record_routed("delivered");

        Ok(Delivery {
            destination: message.destination,
            acknowledged,
        })
    }

    /// Drop a record whose connection is no longer open.
    fn evict(&self, handle: &ConnectionHandle) {
        handle.close();
        if let Some(identity) = self.presence.leave(handle.id()) {
            debug!(identity = %identity, connection = %handle.id(), "Evicted stale record");
        }
    }

    /// Tell the sender how delivery went. Failures are logged, never retried.
    fn acknowledge(&self, message: &RoutedMessage, delivered: bool) -> bool {
        let Some(sender) = message.sender.as_deref() else {
            return false;
        };
        let Some(record) = self.registry.lookup(sender) else {
            debug!(sender = %sender, "Sender not registered, no delivery status");
            return false;
        };

        let status = Outbound::delivery_status(
            &message.destination,
            delivered,
            message.correlation_id.clone(),
        );
        let result = codec::encode(&status)
            .map_err(RelayError::from)
            .and_then(|text| {
                record
                    .handle
                    .send_text(text)
                    .map_err(|_| RelayError::DestinationUnreachable(sender.to_string()))
            });

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(sender = %sender, error = %e, "Failed to send delivery status");
                false
            }
        }
    }
}
