//! Server configuration.
//!
//! Configuration is layered, lowest priority first:
//! - Built-in defaults (`HOST` and `PORT` override the default address)
//! - TOML configuration file
//! - Environment variables (`RELAY_*`, nested keys separated by `__`)

use anyhow::{ensure, Context, Result};
use ::config::builder::DefaultState;
use ::config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenvis_relay_core::{ChannelScheme, HubConfig, LivenessConfig};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Liveness probe configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Direct-user channel naming.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Shutdown configuration.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between pings in milliseconds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Interval between staleness sweeps in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Silence after which a connection is evicted, in milliseconds.
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

/// Channel naming for addressed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// First channel segment.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Second channel segment.
    #[serde(default = "default_kind")]
    pub kind: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for sessions to finish, in milliseconds.
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

// Default value functions
fn default_host() -> String {
    host_or_default(std::env::var("HOST").ok())
}

/// `HOST` is only honoured when it is an IP address; shells often set it
/// to the machine's hostname.
fn host_or_default(host: Option<String>) -> String {
    host.filter(|h| h.parse::<IpAddr>().is_ok())
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_probe_interval() -> u64 {
    30_000
}

fn default_sweep_interval() -> u64 {
    35_000
}

fn default_stale_after() -> u64 {
    65_000
}

fn default_namespace() -> String {
    "chat".to_string()
}

fn default_kind() -> String {
    "user".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_grace() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            routing: RoutingConfig::default(),
            metrics: MetricsConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            sweep_interval_ms: default_sweep_interval(),
            stale_after_ms: default_stale_after(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kind: default_kind(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found plus the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = Self::locate() {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path));
        }
        Self::from_builder(builder.add_source(Self::environment()))
    }

    /// Load configuration from a specific file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_builder(::config::Config::builder().add_source(File::from(path)))
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Build from already layered sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources do not form a valid configuration.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot run.
    ///
    /// # Errors
    ///
    /// Returns an error for zero heartbeat intervals, or a staleness
    /// threshold that a live connection could not meet between probes.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = &self.heartbeat;
        ensure!(
            heartbeat.probe_interval_ms > 0,
            "heartbeat.probe_interval_ms must be greater than zero"
        );
        ensure!(
            heartbeat.sweep_interval_ms > 0,
            "heartbeat.sweep_interval_ms must be greater than zero"
        );
        ensure!(
            heartbeat.stale_after_ms > heartbeat.probe_interval_ms,
            "heartbeat.stale_after_ms ({}) must exceed heartbeat.probe_interval_ms ({})",
            heartbeat.stale_after_ms,
            heartbeat.probe_interval_ms
        );
        Ok(())
    }

    /// `RELAY_*` environment source.
    #[must_use]
    pub fn environment() -> Environment {
        Environment::with_prefix("RELAY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// First existing config file: `RELAY_CONFIG`, then the default paths.
    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            liveness: LivenessConfig {
                probe_interval: Duration::from_millis(self.heartbeat.probe_interval_ms),
                sweep_interval: Duration::from_millis(self.heartbeat.sweep_interval_ms),
                stale_after: Duration::from_millis(self.heartbeat.stale_after_ms),
            },
            scheme: ChannelScheme::new(&self.routing.namespace, &self.routing.kind),
            max_frame_size: self.transport.max_message_size,
        }
    }

    /// Shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_ms)
    }
}
