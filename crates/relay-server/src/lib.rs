//! # Relay Server
//!
//! HTTP and WebSocket front end for the relay hub: configuration loading,
//! metrics export, the axum routes, and graceful shutdown.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
