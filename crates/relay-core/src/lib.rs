//! # relay-core
//!
//! Presence tracking and addressed message delivery for the Relay server.
//!
//! This crate provides the building blocks:
//!
//! - **Registry** - Which identity is online on which connection
//! - **Presence** - Broadcast online/offline changes to every connection
//! - **Router** - Forward envelopes addressed to `<namespace>.<kind>.<identity>`
//! - **Liveness** - Probe connections and evict the silent ones
//! - **Session** - Own one connection from accept to close
//! - **Hub** - Shared state tying the above together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │ outbox            ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Liveness   │────▶│  Presence   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod channel;
pub mod connections;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;

pub use channel::ChannelScheme;
pub use connections::ConnectionTable;
pub use error::RelayError;
pub use hub::{Hub, HubConfig};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use message::{Identity, PresenceEvent, RoutedMessage};
pub use presence::Presence;
pub use registry::{ConnectionRecord, Registration, Registry};
pub use router::{Delivery, MessageRouter};
pub use session::{CloseReason, Session, SessionState};
