//! Shareable handles to live connections.
//!
//! The session task owns the socket. Everyone else (router, presence
//! broadcaster, liveness monitor) holds a cheap [`ConnectionHandle`] that
//! enqueues onto the session's outbox and can ask the session to close.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::traits::{ConnectionId, Outgoing, TransportError};

/// A cloneable handle used to write to a connection from other tasks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: CancellationToken,
}

/// The receiving half of a handle, drained by the session that owns the socket.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl ConnectionHandle {
    /// Create a handle and the outbox it feeds.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            tx,
            closed: CancellationToken::new(),
        };
        (handle, Outbox { rx })
    }

    /// The connection this handle points at.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether the connection is believed open.
    ///
    /// False once [`close`](Self::close) was requested or the owning session
    /// has dropped its outbox.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Enqueue a message for the peer. Never waits on the network.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is
    /// closing or its session is gone.
    pub fn send(&self, message: Outgoing) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Enqueue a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Outgoing::Text(text.into()))
    }

    /// Enqueue a liveness probe.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn ping(&self) -> Result<(), TransportError> {
        self.send(Outgoing::Ping)
    }

    /// Ask the owning session to close the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled when a close is requested.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Outbox {
    /// Next queued message, or `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.rx.try_recv().ok()
    }
}
