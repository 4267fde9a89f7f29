//! Bridge configuration – reads `lunar-bridge.toml`.
//!
//! Every field has a default taken from the rover's stock setup, so a missing
//! file is not an error. `LUNAR_*` environment variables override whatever
//! the file says.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lunar_types::{BridgeError, DEFAULT_TILT_RAD, SessionConfig, TopicSet};
use serde::{Deserialize, Serialize};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "lunar-bridge.toml";

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// ZeroMQ endpoint the rover publishes sensor data on.
    #[serde(default = "default_sensors_endpoint")]
    pub sensors_endpoint: String,

    /// ZeroMQ endpoint the rover listens for motor commands on.
    #[serde(default = "default_motors_endpoint")]
    pub motors_endpoint: String,

    /// Interface the HTTP/WebSocket server binds.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Camera tilt sent when a client connects, in radians.
    #[serde(default = "default_initial_tilt_rad")]
    pub initial_tilt_rad: f64,

    /// End a session after this many seconds without telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_timeout_secs: Option<u64>,

    /// HTML file served at `/` instead of the built-in page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_page: Option<PathBuf>,

    #[serde(default)]
    pub topics: TopicSet,
}

fn default_sensors_endpoint() -> String {
    "tcp://lunar-rover-0.eec:5555".to_string()
}
fn default_motors_endpoint() -> String {
    "tcp://lunar-rover-0.eec:5556".to_string()
}
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    lunar_cockpit::DEFAULT_PORT
}
fn default_initial_tilt_rad() -> f64 {
    DEFAULT_TILT_RAD
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensors_endpoint: default_sensors_endpoint(),
            motors_endpoint: default_motors_endpoint(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            initial_tilt_rad: default_initial_tilt_rad(),
            telemetry_timeout_secs: None,
            control_page: None,
            topics: TopicSet::default(),
        }
    }
}

impl Config {
    /// Settings handed to every client session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            topics: self.topics.clone(),
            initial_tilt_rad: self.initial_tilt_rad,
            telemetry_timeout: self.telemetry_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Resolve `listen_host:listen_port` into a bindable address.
    ///
    /// Host names go through the runtime's resolver, off the worker threads.
    pub async fn listen_addr(&self) -> Result<SocketAddr, BridgeError> {
        tokio::net::lookup_host((self.listen_host.as_str(), self.listen_port))
            .await
            .map_err(|e| BridgeError::Config(format!("invalid listen host {}: {e}", self.listen_host)))?
            .next()
            .ok_or_else(|| BridgeError::Config(format!("listen host {} has no address", self.listen_host)))
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.sensors_endpoint.is_empty() || self.motors_endpoint.is_empty() {
            return Err(BridgeError::Config("bus endpoints must not be empty".to_string()));
        }
        if !self.initial_tilt_rad.is_finite() {
            return Err(BridgeError::Config("initial_tilt_rad must be a finite number".to_string()));
        }
        if self.telemetry_timeout_secs == Some(0) {
            return Err(BridgeError::Config("telemetry_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Pick the config file: the first CLI argument, then `LUNAR_BRIDGE_CONFIG`,
/// then [`DEFAULT_CONFIG_FILE`].
pub fn config_path(cli_arg: Option<String>, env_value: Option<String>) -> PathBuf {
    cli_arg
        .or(env_value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load, apply environment overrides, and validate.
pub fn load(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config file alone. Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `LUNAR_*` overrides, looking each variable up through `lookup`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LUNAR_SENSORS_ENDPOINT` | `sensors_endpoint` |
/// | `LUNAR_MOTORS_ENDPOINT` | `motors_endpoint` |
/// | `LUNAR_LISTEN_HOST` | `listen_host` |
/// | `LUNAR_LISTEN_PORT` | `listen_port` |
/// | `LUNAR_INITIAL_TILT_RAD` | `initial_tilt_rad` |
/// | `LUNAR_TELEMETRY_TIMEOUT_SECS` | `telemetry_timeout_secs` |
///
/// Values that do not parse are ignored.
pub fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("LUNAR_SENSORS_ENDPOINT") {
        cfg.sensors_endpoint = v;
    }
    if let Some(v) = lookup("LUNAR_MOTORS_ENDPOINT") {
        cfg.motors_endpoint = v;
    }
    if let Some(v) = lookup("LUNAR_LISTEN_HOST") {
        cfg.listen_host = v;
    }
    if let Some(v) = lookup("LUNAR_LISTEN_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.listen_port = port;
    }
    if let Some(v) = lookup("LUNAR_INITIAL_TILT_RAD")
        && let Ok(alpha) = v.parse::<f64>()
    {
        cfg.initial_tilt_rad = alpha;
    }
    if let Some(v) = lookup("LUNAR_TELEMETRY_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.telemetry_timeout_secs = Some(secs);
    }
}
