//! HTTP and WebSocket handlers for the Relay server.
//!
//! The WebSocket endpoint hands each upgraded socket to a core session. The
//! HTTP endpoints are read-only views of the registry.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tenvis_relay_core::message::now_millis;
use tenvis_relay_core::Hub;
use tenvis_relay_transport::WebSocketConnection;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with a fresh hub.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Hub::new(config.hub_config()),
            config,
        }
    }
}

/// Build the HTTP router.
///
/// CORS is open to every origin so pages served from another host can read
/// the presence views.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/online-users", get(online_users_handler))
        .route("/online-users/check", get(online_users_check_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP/WebSocket server until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config)), shutdown_signal()).await
}

/// Serve on an already bound listener until `signal` resolves, then shut
/// the hub down before the listener is released.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = state.hub.clone();
    let grace = state.config.shutdown_grace();
    hub.start_liveness();

    let app = build_app(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutting down");
            hub.shutdown(grace).await;
        })
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => warn!("Received Ctrl+C"),
        () = terminate => warn!("Received terminate signal"),
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "server_time": now_millis(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Every online identity with its last liveness reply.
async fn online_users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let users: Vec<Value> = state
        .hub
        .registry()
        .records()
        .into_iter()
        .map(|record| {
            json!({
                "username": record.identity,
                "last_seen": record.last_seen_at,
                "online": true
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "server_time": now_millis(),
        "users": users
    }))
}

#[derive(Debug, Deserialize)]
struct CheckParams {
    usernames: Option<String>,
}

/// Online status for a comma-separated list of identities.
async fn online_users_check_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CheckParams>,
) -> impl IntoResponse {
    let statuses: Map<String, Value> = params
        .usernames
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_string(), Value::Bool(state.hub.is_online(name))))
        .collect();

    Json(json!({
        "success": true,
        "server_time": now_millis(),
        "statuses": statuses
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.hub.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }

    let hub = state.hub.clone();
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| async move {
            let conn = WebSocketConnection::new(socket).with_remote_addr(addr);
            // The socket is dropped, and so closed, if the hub refuses it.
            let _ = hub.spawn_session(conn);
        })
}
