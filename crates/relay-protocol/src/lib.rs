//! # relay-protocol
//!
//! Wire protocol definitions for the Relay presence server.
//!
//! Clients and the server exchange JSON documents over WebSocket text
//! messages. Inbound documents are classified into a small sum type;
//! outbound documents are tagged by their `type` field.
//!
//! ## Inbound kinds
//!
//! - `register` - Claim an identity for the connection
//! - addressed delivery - `{event, channel, data}` routed to `chat.user.<identity>`
//! - `is_online_request` - Ask whether an identity is online
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Inbound, Outbound};
//!
//! let inbound = codec::decode(r#"{"type":"register","username":"alice"}"#).unwrap();
//! assert!(matches!(inbound, Inbound::Register { .. }));
//!
//! let reply = Outbound::online_response("alice", true);
//! let text = codec::encode(&reply).unwrap();
//! assert!(text.contains("is_online_response"));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use envelope::{Envelope, Inbound, Outbound, PresenceChange, PresenceStatus};
