//! Envelope types for the Relay protocol.
//!
//! Every frame on the wire is a JSON text message. Inbound frames are
//! classified into an [`Inbound`] variant; outbound frames are an
//! [`Outbound`] value tagged by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Presence status carried by presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The identity became reachable.
    Online,
    /// The identity is no longer reachable.
    Offline,
}

impl PresenceStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An addressed-delivery envelope.
///
/// The server only looks at `channel` and a couple of well-known keys in
/// `data`; everything else is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Application event name.
    pub event: String,
    /// Destination channel, e.g. `chat.user.bob`.
    pub channel: String,
    /// Opaque application payload.
    pub data: Map<String, Value>,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: impl Into<String>, channel: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event: event.into(),
            channel: channel.into(),
            data,
        }
    }

    /// Identity the client claims to be sending as (`data.user`).
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.data
            .get("user")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Client correlation id (`data.messageId`, or `data.message_id`).
    #[must_use]
    pub fn correlation_id(&self) -> Option<&Value> {
        self.data
            .get("messageId")
            .or_else(|| self.data.get("message_id"))
            .filter(|v| !v.is_null())
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Claim an identity for this connection.
    Register {
        /// Identity being registered.
        identity: String,
    },
    /// Deliver an envelope to the identity addressed by its channel.
    Deliver(Envelope),
    /// Ask whether an identity is online.
    OnlineQuery {
        /// Identity being queried.
        identity: String,
    },
    /// Well-formed JSON that matches none of the known kinds.
    Unrecognized,
}

/// Typed inbound commands, discriminated by `type`.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum Command {
    #[serde(rename = "register")]
    Register { username: String },
    #[serde(rename = "is_online_request")]
    IsOnline { username: String },
}

impl Inbound {
    /// Classify a parsed JSON value.
    ///
    /// Any object carrying `event`, `channel` and an object `data` is an
    /// addressed delivery; otherwise the `type` tag decides.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if is_delivery_shape(&value) {
            return match serde_json::from_value::<Envelope>(value) {
                Ok(envelope) => Inbound::Deliver(envelope),
                Err(_) => Inbound::Unrecognized,
            };
        }

        match serde_json::from_value::<Command>(value) {
            Ok(Command::Register { username }) if !username.is_empty() => Inbound::Register {
                identity: username,
            },
            Ok(Command::IsOnline { username }) if !username.is_empty() => Inbound::OnlineQuery {
                identity: username,
            },
            _ => Inbound::Unrecognized,
        }
    }

    /// Short name of the inbound kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Register { .. } => "register",
            Inbound::Deliver(_) => "deliver",
            Inbound::OnlineQuery { .. } => "online_query",
            Inbound::Unrecognized => "unrecognized",
        }
    }
}

fn is_delivery_shape(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.contains_key("event")
        && obj.contains_key("channel")
        && obj.get("data").is_some_and(Value::is_object)
}

/// The identity whose presence changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    /// Identity that changed.
    pub username: String,
    /// New status.
    pub status: PresenceStatus,
    /// Unix time of the change in milliseconds.
    pub changed_at: u64,
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Registration accepted.
    #[serde(rename = "registered")]
    Registered {
        /// Registered identity.
        username: String,
        /// Opaque session token for this registration.
        session_id: String,
        /// Identities online right after registration.
        users: Vec<String>,
    },

    /// Someone came online or went offline.
    #[serde(rename = "presence_update")]
    PresenceUpdate {
        /// The change.
        changed: PresenceChange,
        /// Full online set after the change.
        users: Vec<String>,
    },

    /// A forwarded addressed delivery.
    #[serde(rename = "message")]
    Message(Envelope),

    /// Outcome of an addressed delivery, sent to its sender.
    #[serde(rename = "delivery_status")]
    DeliveryStatus {
        /// Destination identity.
        to: String,
        /// Whether the envelope was handed to the destination connection.
        delivered: bool,
        /// Echoed correlation id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<Value>,
    },

    /// Answer to an online query.
    #[serde(rename = "is_online_response")]
    OnlineResponse {
        /// Identity queried.
        username: String,
        /// Whether it is registered right now.
        online: bool,
    },
}

impl Outbound {
    /// Create a Registered frame.
    #[must_use]
    pub fn registered(
        username: impl Into<String>,
        session_id: impl Into<String>,
        users: Vec<String>,
    ) -> Self {
        Outbound::Registered {
            username: username.into(),
            session_id: session_id.into(),
            users,
        }
    }

    /// Create a PresenceUpdate frame.
    #[must_use]
    pub fn presence_update(
        username: impl Into<String>,
        status: PresenceStatus,
        changed_at: u64,
        users: Vec<String>,
    ) -> Self {
        Outbound::PresenceUpdate {
            changed: PresenceChange {
                username: username.into(),
                status,
                changed_at,
            },
            users,
        }
    }

    /// Wrap an envelope for delivery.
    #[must_use]
    pub fn forward(envelope: Envelope) -> Self {
        Outbound::Message(envelope)
    }

    /// Create a DeliveryStatus frame.
    #[must_use]
    pub fn delivery_status(to: impl Into<String>, delivered: bool, message_id: Option<Value>) -> Self {
        Outbound::DeliveryStatus {
            to: to.into(),
            delivered,
            message_id,
        }
    }

    /// Create an OnlineResponse frame.
    #[must_use]
    pub fn online_response(username: impl Into<String>, online: bool) -> Self {
        Outbound::OnlineResponse {
            username: username.into(),
            online,
        }
    }

    /// Wire tag of the frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Registered { .. } => "registered",
            Outbound::PresenceUpdate { .. } => "presence_update",
            Outbound::Message(_) => "message",
            Outbound::DeliveryStatus { .. } => "delivery_status",
            Outbound::OnlineResponse { .. } => "is_online_response",
        }
    }
}
