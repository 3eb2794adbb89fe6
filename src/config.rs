// src/config.rs

//! Identity & Config (C1): a process-lifetime-stable server identity and a
//! frozen snapshot of operational parameters, loaded from a TOML file and
//! overlaid with environment variables.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Polling-mode discipline when the cluster is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// Only one instance polls a given `(channel, connector)` at a time.
    #[default]
    Exclusive,
    /// Every instance with the channel deployed polls it independently.
    All,
}

/// Operating mode of the mode controller (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Auto,
    Shadow,
    Takeover,
}

/// Cluster coordination knobs (§6 `MIRTH_CLUSTER_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,

    #[serde(default = "default_sequence_block_size")]
    pub sequence_block_size: i64,

    #[serde(default)]
    pub polling_mode: PollingMode,

    #[serde(with = "humantime_serde", default = "default_lease_ttl")]
    pub lease_ttl: Duration,

    pub secret: Option<String>,

    #[serde(default)]
    pub quorum_enabled: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            sequence_block_size: default_sequence_block_size(),
            polling_mode: PollingMode::default(),
            lease_ttl: default_lease_ttl(),
            secret: None,
            quorum_enabled: false,
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(15)
}
fn default_sequence_block_size() -> i64 {
    100
}
fn default_lease_ttl() -> Duration {
    Duration::from_secs(30)
}

/// The Prometheus metrics HTTP exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8878
}

/// Top-level engine configuration, loaded once at startup and frozen for the
/// life of the process (log level excepted; see `server::initialization`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stable identifier for this instance. If absent, a fresh UUID is
    /// generated on first access and cached (see `ServerIdentity`).
    pub server_id: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// The base URL this instance announces to peers for the remote dispatch
    /// endpoint (`POST <base>/api/internal/dispatch`).
    pub api_url: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub mode: EngineMode,

    /// Channel ids or names allowed to poll while in takeover mode.
    #[serde(default)]
    pub takeover_poll_channels: Vec<String>,

    /// Postgres connection string backing the Message Store and cluster tables.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_database_url() -> String {
    "postgres://localhost/clinicmesh".to_string()
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: None,
            host: default_host(),
            port: default_port(),
            api_url: None,
            log_level: default_log_level(),
            cluster: ClusterConfig::default(),
            metrics: MetricsConfig::default(),
            mode: EngineMode::default(),
            takeover_poll_channels: Vec::new(),
            database_url: default_database_url(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, then overlays recognized
    /// environment variables on top (§6). Misconfigured numeric env values
    /// fall back to the file/default value rather than aborting startup.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file '{path}'"))?;
        let mut config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config file '{path}'"))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies the `MIRTH_*`/`ENGINE_*` environment variables documented in
    /// §6 and SPEC_FULL §C on top of whatever the file specified.
    pub fn apply_env_overrides(&mut self) {
        use std::env;

        if let Ok(v) = env::var("MIRTH_SERVER_ID") {
            self.server_id = Some(v);
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_ENABLED") {
            if let Ok(b) = v.parse() {
                self.cluster.enabled = b;
            }
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_HEARTBEAT_INTERVAL") {
            if let Ok(ms) = v.parse::<u64>() {
                self.cluster.heartbeat_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_HEARTBEAT_TIMEOUT") {
            if let Ok(ms) = v.parse::<u64>() {
                self.cluster.heartbeat_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_SEQUENCE_BLOCK") {
            if let Ok(n) = v.parse::<i64>() {
                self.cluster.sequence_block_size = n;
            }
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_POLLING_MODE") {
            self.cluster.polling_mode = match v.as_str() {
                "all" => PollingMode::All,
                _ => PollingMode::Exclusive,
            };
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_LEASE_TTL") {
            if let Ok(ms) = v.parse::<u64>() {
                self.cluster.lease_ttl = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_SECRET") {
            self.cluster.secret = Some(v);
        }
        if let Ok(v) = env::var("MIRTH_CLUSTER_QUORUM_ENABLED") {
            if let Ok(b) = v.parse() {
                self.cluster.quorum_enabled = b;
            }
        }
        if let Ok(v) = env::var("MIRTH_MODE") {
            self.mode = match v.as_str() {
                "shadow" => EngineMode::Shadow,
                "takeover" => EngineMode::Takeover,
                _ => EngineMode::Auto,
            };
        }
        if let Ok(v) = env::var("MIRTH_TAKEOVER_POLL_CHANNELS") {
            self.takeover_poll_channels =
                v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("ENGINE_METRICS_PORT") {
            if let Ok(p) = v.parse() {
                self.metrics.port = p;
            }
        }
        if let Ok(v) = env::var("ENGINE_SHUTDOWN_GRACE") {
            if let Ok(d) = humantime::parse_duration(&v) {
                self.shutdown_grace = d;
            }
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database_url = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.enabled && self.cluster.sequence_block_size <= 0 {
            return Err(anyhow!("cluster.sequence_block_size must be positive"));
        }
        if self.database_url.is_empty() {
            return Err(anyhow!("database_url must not be empty"));
        }
        Ok(())
    }
}
