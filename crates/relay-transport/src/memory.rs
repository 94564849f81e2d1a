//! In-memory connections.
//!
//! [`pair`] returns a [`MemoryConnection`] for the server side and a
//! [`MemoryPeer`] that plays the client. Used by the session tests and the
//! router benchmarks, where a real socket only adds noise.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, Incoming, Outgoing, TransportError};

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    incoming: mpsc::UnboundedReceiver<Result<Incoming, TransportError>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    closed: bool,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    incoming: mpsc::UnboundedSender<Result<Incoming, TransportError>>,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

/// Create a connected pair under the given ID.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let conn = MemoryConnection {
        id: id.into(),
        incoming: in_rx,
        outgoing: out_tx,
        closed: false,
    };
    let peer = MemoryPeer {
        incoming: in_tx,
        outgoing: out_rx,
    };
    (conn, peer)
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        match self.incoming.recv().await {
            Some(Ok(incoming)) => Ok(Some(incoming)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&mut self, message: Outgoing) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if message == Outgoing::Close {
            return self.close().await;
        }
        self.outgoing
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.outgoing.send(Outgoing::Close);
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

impl MemoryPeer {
    /// Send a text message to the server.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.incoming.send(Ok(Incoming::Text(text.into())));
    }

    /// Send a binary message to the server.
    pub fn send_binary(&self, data: impl Into<bytes::Bytes>) {
        let _ = self.incoming.send(Ok(Incoming::Binary(data.into())));
    }

    /// Answer a liveness probe.
    pub fn pong(&self) {
        let _ = self.incoming.send(Ok(Incoming::Pong));
    }

    /// Make the server side observe a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self
            .incoming
            .send(Err(TransportError::ReceiveFailed(reason.into())));
    }

    /// Next message written by the server, `None` once the server side is gone.
    pub async fn next(&mut self) -> Option<Outgoing> {
        self.outgoing.recv().await
    }

    /// Next text message, skipping probes. `None` on close.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.outgoing.recv().await? {
                Outgoing::Text(text) => return Some(text),
                Outgoing::Ping => continue,
                Outgoing::Close => return None,
            }
        }
    }

    /// Whatever the server has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Ok(message) = self.outgoing.try_recv() {
            out.push(message);
        }
        out
    }
}
