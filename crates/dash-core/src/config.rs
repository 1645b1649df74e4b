//! Configuration for dash-sync.
//!
//! Loaded from TOML, then environment overrides (`DASH_BASE_URL`,
//! `DASH_TRANSPORT`, `DASH_LOG_LEVEL`), then CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dash_feed::StreamConfig;
use serde::Deserialize;
use tracing::warn;

/// Push transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Persistent Server-Sent Events stream.
    #[default]
    Stream,
    /// Interval polling of the combined-state endpoint.
    Poll,
}

impl TransportKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stream" | "sse" => Some(TransportKind::Stream),
            "poll" | "polling" => Some(TransportKind::Poll),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stream => "stream",
            TransportKind::Poll => "poll",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub log_level: String,
    /// Local preferences file (base URL, notification preferences).
    pub prefs_path: PathBuf,

    pub base_url: String,
    pub stream_path: String,
    pub combined_state_path: String,

    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub stream: StreamConfig,

    /// Per-request timeout for pull endpoints.
    pub request_timeout: Duration,

    /// Outage length after which live data is replaced by demo data.
    pub demo_grace: Duration,
    /// Full health-check refresh interval while connected.
    pub health_refresh: Duration,
    /// Pending-order progress at which market fallback is flagged imminent.
    pub fallback_threshold_pct: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            prefs_path: PathBuf::from("dash-prefs.json"),
            base_url: "http://localhost:8080".to_string(),
            stream_path: "/api/stream".to_string(),
            combined_state_path: "/api/state".to_string(),
            transport: TransportKind::Stream,
            poll_interval: Duration::from_millis(5000),
            stream: StreamConfig::default(),
            request_timeout: Duration::from_secs(10),
            demo_grace: Duration::from_secs(10),
            health_refresh: Duration::from_secs(60),
            fallback_threshold_pct: 80.0,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DASH_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(kind) = std::env::var("DASH_TRANSPORT") {
            match TransportKind::from_str(&kind) {
                Some(kind) => self.transport = kind,
                None => warn!("Ignoring DASH_TRANSPORT={kind:?}, expected stream or poll"),
            }
        }
        if let Ok(level) = std::env::var("DASH_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_cli_overrides(
        &mut self,
        base_url: Option<String>,
        transport: Option<String>,
        log_level: Option<String>,
    ) -> Result<()> {
        if let Some(url) = base_url {
            self.base_url = url;
        }

        if let Some(kind) = transport {
            match TransportKind::from_str(&kind) {
                Some(kind) => self.transport = kind,
                None => bail!("Unknown transport {kind:?}, expected stream or poll"),
            }
        }

        if let Some(level) = log_level {
            self.log_level = level;
        }
        Ok(())
    }

    /// Validate configuration and return errors for invalid values.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            bail!("base_url must start with http:// or https://, got {:?}", self.base_url);
        }
        if !self.stream_path.starts_with('/') || !self.combined_state_path.starts_with('/') {
            bail!("stream_path and combined_state_path must start with '/'");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval_ms must be positive");
        }
        if self.stream.heartbeat_timeout.is_zero() {
            bail!("heartbeat_timeout_secs must be positive");
        }
        if self.stream.connect_timeout.is_zero() {
            bail!("connect_timeout_secs must be positive");
        }
        if self.stream.initial_reconnect_delay.is_zero() {
            bail!("initial_reconnect_delay_ms must be positive");
        }
        if self.stream.max_reconnect_delay < self.stream.initial_reconnect_delay {
            bail!("max_reconnect_delay cannot be below initial_reconnect_delay");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout_secs must be positive");
        }
        if self.health_refresh.is_zero() {
            bail!("health_refresh_secs must be positive");
        }
        if !(self.fallback_threshold_pct > 0.0 && self.fallback_threshold_pct <= 100.0) {
            bail!("fallback_threshold_pct must be in (0, 100]");
        }

        Ok(())
    }
}

/// TOML file structure for deserialization.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    server: ServerToml,
    #[serde(default)]
    stream: StreamToml,
    #[serde(default)]
    fetch: FetchToml,
    #[serde(default)]
    sync: SyncToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    log_level: String,
    prefs_path: PathBuf,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            prefs_path: PathBuf::from("dash-prefs.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ServerToml {
    base_url: String,
    stream_path: String,
    combined_state_path: String,
}

impl Default for ServerToml {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            stream_path: "/api/stream".to_string(),
            combined_state_path: "/api/state".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StreamToml {
    transport: String,
    poll_interval_ms: u64,
    heartbeat_timeout_secs: u64,
    connect_timeout_secs: u64,
    initial_reconnect_delay_ms: u64,
    max_reconnect_delay_secs: u64,
}

impl Default for StreamToml {
    fn default() -> Self {
        Self {
            transport: "stream".to_string(),
            poll_interval_ms: 5000,
            heartbeat_timeout_secs: 45,
            connect_timeout_secs: 10,
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FetchToml {
    request_timeout_secs: u64,
}

impl Default for FetchToml {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SyncToml {
    demo_grace_secs: u64,
    health_refresh_secs: u64,
    fallback_threshold_pct: f64,
}

impl Default for SyncToml {
    fn default() -> Self {
        Self {
            demo_grace_secs: 10,
            health_refresh_secs: 60,
            fallback_threshold_pct: 80.0,
        }
    }
}

impl From<TomlConfig> for SyncConfig {
    fn from(toml: TomlConfig) -> Self {
        let transport = TransportKind::from_str(&toml.stream.transport).unwrap_or_else(|| {
            warn!(
                "Unknown transport {:?} in config, using stream",
                toml.stream.transport
            );
            TransportKind::Stream
        });

        Self {
            log_level: toml.general.log_level,
            prefs_path: toml.general.prefs_path,
            base_url: toml.server.base_url,
            stream_path: toml.server.stream_path,
            combined_state_path: toml.server.combined_state_path,
            transport,
            poll_interval: Duration::from_millis(toml.stream.poll_interval_ms),
            stream: StreamConfig {
                connect_timeout: Duration::from_secs(toml.stream.connect_timeout_secs),
                heartbeat_timeout: Duration::from_secs(toml.stream.heartbeat_timeout_secs),
                initial_reconnect_delay: Duration::from_millis(toml.stream.initial_reconnect_delay_ms),
                max_reconnect_delay: Duration::from_secs(toml.stream.max_reconnect_delay_secs),
            },
            request_timeout: Duration::from_secs(toml.fetch.request_timeout_secs),
            demo_grace: Duration::from_secs(toml.sync.demo_grace_secs),
            health_refresh: Duration::from_secs(toml.sync.health_refresh_secs),
            fallback_threshold_pct: toml.sync.fallback_threshold_pct,
        }
    }
}
