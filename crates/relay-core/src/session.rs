//! Per-connection lifecycle.
//!
//! A [`Session`] owns one transport connection for its whole life. It is the
//! only writer to the socket: everything other tasks want to send arrives
//! through the connection handle's outbox and is written here, in order.
//! However the connection ends, the session unregisters it exactly once.

use crate::error::RelayError;
use crate::hub::Hub;
use crate::metrics;
use relay_protocol::{codec, FrameCodec, Inbound, Outbound};
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_transport::{Connection, ConnectionHandle, Incoming, Outbox};
use tokio::sync::watch;
use tracing::{debug, warn};

/// How long teardown waits for the transport to finish closing.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet attached to the hub.
    Connecting,
    /// Attached and processing frames.
    Open,
    /// Loop exited, teardown running.
    Closing,
    /// Unregistered and detached.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// The transport failed.
    TransportError(String),
    /// The server closed it (liveness eviction or shutdown).
    ServerClosed,
}

/// The lifecycle controller for one connection.
pub struct Session<C: Connection> {
    conn: C,
    handle: ConnectionHandle,
    outbox: Outbox,
    hub: Arc<Hub>,
    codec: FrameCodec,
    state: watch::Sender<SessionState>,
}

impl<C: Connection> Session<C> {
    /// Create a session for a freshly accepted connection.
    #[must_use]
    pub fn new(hub: Arc<Hub>, conn: C) -> Self {
        let (handle, outbox) = ConnectionHandle::new(conn.id().clone());
        let codec = hub.codec();
        Self {
            conn,
            handle,
            outbox,
            hub,
            codec,
            state: watch::Sender::new(SessionState::Connecting),
        }
    }

    /// Handle other tasks use to reach this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that follows the lifecycle state, including after
    /// [`run`](Self::run) has consumed the session.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Attach the connection to the hub. Does nothing if already open.
    pub fn open(&mut self) {
        if self.state() != SessionState::Connecting {
            return;
        }
        self.hub.attach(self.handle.clone());
        self.state.send_replace(SessionState::Open);
        debug!(
            connection = %self.handle.id(),
            remote = self.conn.remote_addr().as_deref().unwrap_or("-"),
            "Session open"
        );
    }

    /// Run the session until the connection ends.
    ///
    /// Writes to the peer never hold up a close request: a peer that stops
    /// reading is dropped as soon as the handle is closed.
    pub async fn run(mut self) -> CloseReason {
        self.open();

        let closed = self.handle.close_signal();
        let reason = loop {
            tokio::select! {
                biased;

                () = closed.cancelled() => break CloseReason::ServerClosed,

                Some(outgoing) = self.outbox.recv() => {
                    let written = tokio::select! {
                        biased;
                        () = closed.cancelled() => None,
                        result = self.conn.send(outgoing) => Some(result),
                    };
                    match written {
                        None => break CloseReason::ServerClosed,
                        Some(Err(e)) => {
                            warn!(connection = %self.handle.id(), error = %e, "Write failed");
                            break CloseReason::TransportError(e.to_string());
                        }
                        Some(Ok(())) => {}
                    }
                }

                incoming = self.conn.recv() => match incoming {
                    Ok(Some(Incoming::Text(text))) => {
                        let inbound = self.codec.decode(&text);
                        self.handle_inbound(inbound);
                    }
                    Ok(Some(Incoming::Binary(data))) => {
                        let inbound = self.codec.decode_bytes(&data);
                        self.handle_inbound(inbound);
                    }
                    Ok(Some(Incoming::Pong)) => {
                        self.hub.touch(self.handle.id());
                    }
                    Ok(None) => break CloseReason::PeerClosed,
                    Err(e) => {
                        warn!(connection = %self.handle.id(), error = %e, "WebSocket error");
                        metrics::record_error("transport");
                        break CloseReason::TransportError(e.to_string());
                    }
                },
            }
        };

        self.state.send_replace(SessionState::Closing);
        match tokio::time::timeout(CLOSE_TIMEOUT, self.conn.close()).await {
            Ok(Err(e)) => {
                debug!(connection = %self.handle.id(), error = %e, "Close after end of session");
            }
            Err(_) => warn!(connection = %self.handle.id(), "Transport close timed out"),
            Ok(Ok(())) => {}
        }
        self.hub.detach(self.handle.id());
        self.state.send_replace(SessionState::Closed);

        debug!(connection = %self.handle.id(), reason = ?reason, "Session closed");
        reason
    }

    fn handle_inbound(&self, inbound: Result<Inbound, relay_protocol::ProtocolError>) {
        match inbound {
            Ok(inbound) => self.dispatch(inbound),
            Err(e) => {
                let error = RelayError::MalformedFrame(e.to_string());
                warn!(connection = %self.handle.id(), error = %error, "Dropping frame");
                metrics::record_dropped_frame("malformed");
            }
        }
    }

    fn dispatch(&self, inbound: Inbound) {
        debug!(connection = %self.handle.id(), kind = inbound.kind(), "Received");

        match inbound {
            Inbound::Register { identity } => {
                if let Err(e) = self.hub.register(&identity, &self.handle) {
                    warn!(connection = %self.handle.id(), identity = %identity, error = %e, "Registration failed");
                    metrics::record_error(e.label());
                }
            }
            Inbound::Deliver(envelope) => {
                // Failures were already reported to the sender where possible.
                let _ = self.hub.deliver(self.handle.id(), envelope);
            }
            Inbound::OnlineQuery { identity } => {
                let online = self.hub.is_online(&identity);
                self.reply(&Outbound::online_response(identity, online));
            }
            Inbound::Unrecognized => {
                warn!(connection = %self.handle.id(), "Unknown message format");
                metrics::record_dropped_frame("unrecognized");
            }
        }
    }

    fn reply(&self, frame: &Outbound) {
        let result = codec::encode(frame)
            .map_err(RelayError::from)
            .and_then(|text| {
                self.handle
                    .send_text(text)
                    .map_err(|e| RelayError::MalformedFrame(e.to_string()))
            });
        if let Err(e) = result {
            warn!(connection = %self.handle.id(), frame = frame.kind(), error = %e, "Failed to reply");
        }
    }
}
