//! Configuration schema definitions.
//!
//! Durations are stored as milliseconds so files stay readable; the
//! `to_*` methods convert them into the engine's types.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use onebot11_core::{
    BackpressurePolicy, BotConfig, DispatchConfig, HeartbeatPolicy, ReconnectPolicy,
};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gateways to connect to, one bot each.
    #[serde(default)]
    pub bots: Vec<BotEntry>,
}

impl AppConfig {
    /// Returns the bots that are switched on.
    pub fn enabled_bots(&self) -> impl Iterator<Item = &BotEntry> {
        self.bots.iter().filter(|bot| bot.enabled)
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive fragment.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module levels, e.g. `onebot11_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

// =============================================================================
// Bots
// =============================================================================

/// One gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEntry {
    /// Unique identifier for this bot instance.
    pub id: String,

    /// Whether this bot is started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// WebSocket URL (`ws://` or `wss://`).
    #[serde(default)]
    pub event_url: Option<String>,

    /// HTTP API base URL, used when there is no WebSocket.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Token shared by both directions.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Overrides `access_token` for the WebSocket.
    #[serde(default)]
    pub event_access_token: Option<String>,

    /// Overrides `access_token` for HTTP calls.
    #[serde(default)]
    pub api_access_token: Option<String>,

    /// Default API call timeout in milliseconds.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// How long shutdown waits for in-flight calls, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Query login and version info after each connect.
    #[serde(default = "default_enabled")]
    pub probe_on_connect: bool,
}

impl BotEntry {
    /// Creates an enabled WebSocket entry with default settings.
    pub fn websocket(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            event_url: Some(url.into()),
            ..Self::new(id)
        }
    }

    /// Creates an enabled HTTP-only entry with default settings.
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            api_url: Some(url.into()),
            ..Self::new(id)
        }
    }

    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            event_url: None,
            api_url: None,
            access_token: None,
            event_access_token: None,
            api_access_token: None,
            api_timeout_ms: default_api_timeout_ms(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            dispatch: DispatchSettings::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            probe_on_connect: true,
        }
    }

    /// Converts to the engine configuration.
    pub fn to_bot_config(&self) -> BotConfig {
        BotConfig {
            id: self.id.clone(),
            event_url: self.event_url.clone(),
            api_url: self.api_url.clone(),
            access_token: self.access_token.clone(),
            event_access_token: self.event_access_token.clone(),
            api_access_token: self.api_access_token.clone(),
            api_timeout: Duration::from_millis(self.api_timeout_ms),
            reconnect: self.reconnect.to_policy(),
            heartbeat: self.heartbeat.to_policy(),
            dispatch: self.dispatch.to_config(),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            probe_on_connect: self.probe_on_connect,
            ..BotConfig::default()
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_api_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Reconnection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum retries after a loss; absent means unlimited.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectConfig {
    /// Converts to the engine policy.
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.enabled,
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Heartbeat liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fixed liveness timeout in milliseconds; derived from the gateway's
    /// announced interval when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_missed_beats")]
    pub missed_beats: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
            missed_beats: default_missed_beats(),
        }
    }
}

impl HeartbeatConfig {
    /// Converts to the engine policy.
    pub fn to_policy(&self) -> HeartbeatPolicy {
        HeartbeatPolicy {
            enabled: self.enabled,
            timeout: self.timeout_ms.map(Duration::from_millis),
            missed_beats: self.missed_beats,
        }
    }
}

fn default_missed_beats() -> u32 {
    3
}

/// Backpressure policy names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressureMode {
    #[default]
    DropOldest,
    DropNewest,
    Block,
}

/// Event dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Capacity of each listener's queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub backpressure: BackpressureMode,

    /// Longest wait for room under `block`, in milliseconds.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressureMode::default(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

impl DispatchSettings {
    /// Converts to the engine configuration.
    pub fn to_config(&self) -> DispatchConfig {
        let policy = match self.backpressure {
            BackpressureMode::DropOldest => BackpressurePolicy::DropOldest,
            BackpressureMode::DropNewest => BackpressurePolicy::DropNewest,
            BackpressureMode::Block => BackpressurePolicy::Block {
                timeout: Duration::from_millis(self.block_timeout_ms),
            },
        };
        DispatchConfig {
            queue_capacity: self.queue_capacity,
            policy,
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_block_timeout_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_entry_uses_engine_defaults() {
        let entry: BotEntry = serde_yaml::from_str("id: main\nevent_url: ws://127.0.0.1:3001\n").unwrap();
        let config = entry.to_bot_config();
        let defaults = BotConfig::default();

        assert_eq!(config.id, "main");
        assert_eq!(config.event_url.as_deref(), Some("ws://127.0.0.1:3001"));
        assert_eq!(config.api_timeout, defaults.api_timeout);
        assert_eq!(config.reconnect, defaults.reconnect);
        assert_eq!(config.heartbeat, defaults.heartbeat);
        assert_eq!(config.dispatch, defaults.dispatch);
        assert_eq!(config.shutdown_grace, defaults.shutdown_grace);
        assert!(config.probe_on_connect);
    }

    #[test]
    fn test_full_entry_converts_units() {
        let yaml = r#"
id: side
enabled: false
api_url: http://127.0.0.1:3000
access_token: shared
api_access_token: api-only
api_timeout_ms: 2500
reconnect:
  max_retries: 4
  initial_delay_ms: 500
  max_delay_ms: 8000
  backoff_multiplier: 1.5
heartbeat:
  timeout_ms: 20000
dispatch:
  queue_capacity: 16
  backpressure: block
  block_timeout_ms: 250
shutdown_grace_ms: 100
"#;
        let entry: BotEntry = serde_yaml::from_str(yaml).unwrap();
        assert!(!entry.enabled);

        let config = entry.to_bot_config();
        assert_eq!(config.api_timeout, Duration::from_millis(2500));
        assert_eq!(config.effective_api_token(), Some("api-only"));
        assert_eq!(config.effective_event_token(), Some("shared"));
        assert_eq!(config.reconnect.max_retries, Some(4));
        assert_eq!(config.reconnect.delay_for(2), Duration::from_millis(750));
        assert_eq!(config.heartbeat.timeout, Some(Duration::from_secs(20)));
        assert_eq!(
            config.dispatch.policy,
            BackpressurePolicy::Block {
                timeout: Duration::from_millis(250)
            }
        );
        assert_eq!(config.dispatch.queue_capacity, 16);
        assert_eq!(config.shutdown_grace, Duration::from_millis(100));
    }

    #[test]
    fn test_logging_config_parses_filters() {
        let yaml = r#"
level: debug
format: pretty
output: stderr
filters:
  onebot11_core: trace
"#;
        let logging: LoggingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(logging.level, LogLevel::Debug);
        assert_eq!(logging.format, LogFormat::Pretty);
        assert_eq!(logging.output, LogOutput::Stderr);
        assert_eq!(logging.filters.get("onebot11_core"), Some(&LogLevel::Trace));
        assert_eq!(logging.file_path, None);
    }

    #[test]
    fn test_enabled_bots() {
        let mut off = BotEntry::http("off", "http://x");
        off.enabled = false;
        let config = AppConfig {
            logging: LoggingConfig::default(),
            bots: vec![BotEntry::websocket("on", "ws://x"), off],
        };
        let ids: Vec<_> = config.enabled_bots().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["on"]);
    }
}
