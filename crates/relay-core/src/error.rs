//! Error taxonomy for Relay.
//!
//! Every error is scoped to one connection or one routing attempt; none of
//! them is fatal to the server.

use relay_protocol::ProtocolError;
use thiserror::Error;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Registration attempted on a handle that is already closed.
    #[error("Connection is not open, cannot register {identity}")]
    ConnectionNotOpen {
        /// Identity that was being registered.
        identity: String,
    },

    /// Channel does not address a single user.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Destination identity has no open connection.
    #[error("Destination unreachable: {0}")]
    DestinationUnreachable(String),

    /// Inbound data could not be parsed.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// No liveness response within the staleness threshold.
    #[error("No liveness response from {identity} for {elapsed_ms} ms")]
    ProbeTimeout {
        /// Identity being evicted.
        identity: String,
        /// Time since the last response.
        elapsed_ms: u64,
    },

    /// Outbound frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl RelayError {
    /// Short label used for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RelayError::ConnectionNotOpen { .. } => "connection_not_open",
            RelayError::InvalidChannel(_) => "invalid_channel",
            RelayError::DestinationUnreachable(_) => "destination_unreachable",
            RelayError::MalformedFrame(_) => "malformed_frame",
            RelayError::ProbeTimeout { .. } => "probe_timeout",
            RelayError::Protocol(_) => "protocol",
        }
    }
}
