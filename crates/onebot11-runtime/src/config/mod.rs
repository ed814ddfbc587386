//! Configuration for OneBot v11 bot processes.
//!
//! This module provides figment-based loading (files, environment, programmatic
//! merges) and validation of [`AppConfig`]. Each [`BotEntry`] converts into the
//! engine's [`BotConfig`](onebot11_core::BotConfig).

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AppConfig, BackpressureMode, BotEntry, DispatchSettings, HeartbeatConfig, LogFormat, LogLevel,
    LogOutput, LoggingConfig, ReconnectConfig, SpanEventConfig,
};
pub use validation::validate_config;
