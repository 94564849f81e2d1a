//! Transient message types for Relay.
//!
//! Neither type is stored: a [`PresenceEvent`] is built and broadcast
//! immediately, a [`RoutedMessage`] lives for one routing decision.

use relay_protocol::{Envelope, Outbound, PresenceStatus};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A client-asserted identity.
pub type Identity = String;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An identity changed presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// Identity that changed.
    pub identity: Identity,
    /// New status.
    pub status: PresenceStatus,
    /// When the change happened (Unix ms).
    pub timestamp: u64,
    /// Every identity online after the change, in registration order.
    pub snapshot: Vec<Identity>,
}

impl PresenceEvent {
    /// Create a presence event stamped with the current time.
    #[must_use]
    pub fn new(identity: impl Into<Identity>, status: PresenceStatus, snapshot: Vec<Identity>) -> Self {
        Self {
            identity: identity.into(),
            status,
            timestamp: now_millis(),
            snapshot,
        }
    }

    /// The wire frame for this event.
    #[must_use]
    pub fn into_frame(self) -> Outbound {
        Outbound::presence_update(self.identity, self.status, self.timestamp, self.snapshot)
    }
}

/// One addressed delivery being routed.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// Identity the channel resolved to.
    pub destination: Identity,
    /// Identity to acknowledge, if known.
    pub sender: Option<Identity>,
    /// The original envelope, forwarded untouched.
    pub envelope: Envelope,
    /// Client correlation id echoed in the acknowledgement.
    pub correlation_id: Option<Value>,
}

impl RoutedMessage {
    /// Create a routed message for an envelope.
    #[must_use]
    pub fn new(destination: impl Into<Identity>, envelope: Envelope) -> Self {
        Self {
            destination: destination.into(),
            sender: envelope.sender().map(str::to_string),
            correlation_id: envelope.correlation_id().cloned(),
            envelope,
        }
    }

    /// Set the sender when the envelope did not name one.
    #[must_use]
    pub fn with_fallback_sender(mut self, sender: Option<Identity>) -> Self {
        if self.sender.is_none() {
            self.sender = sender;
        }
        self
    }
}
