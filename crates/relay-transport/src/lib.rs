//! # tenvis-relay-transport
//!
//! Connection abstraction layer for the Relay presence server.
//!
//! - **WebSocket** - upgraded axum sockets, the production transport
//! - **Memory** - in-process pairs for tests and benchmarks
//!
//! ## Connection Abstraction
//!
//! Every transport implements the [`Connection`] trait, which the session
//! loop drives. Other tasks write to a connection through a
//! [`ConnectionHandle`], which never waits on the network.
//!
//! ```rust,ignore
//! use tenvis_relay_transport::{Connection, ConnectionHandle};
//!
//! async fn drive(mut conn: impl Connection) {
//!     let (handle, mut outbox) = ConnectionHandle::new(conn.id().clone());
//!     while let Ok(Some(incoming)) = conn.recv().await {
//!         // Process incoming
//!     }
//! }
//! ```

pub mod handle;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use handle::{ConnectionHandle, Outbox};
pub use traits::{Connection, ConnectionId, Incoming, Outgoing, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
