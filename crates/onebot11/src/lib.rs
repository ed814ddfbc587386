//! # onebot11
//!
//! An async client for OneBot v11 gateways.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ OneBotRuntime│────▶│ OneBotBot (facade)│────▶│ EventDispatcher  │──▶ listeners
//! │ (config, log)│     │  call_api / on    │     └──────────────────┘
//! └──────────────┘     └─────────┬─────────┘
//!                                │
//!                      ┌─────────▼─────────┐     ┌──────────────────┐
//!                      │ ConnectionManager │────▶│ EchoCorrelator   │
//!                      │ (WebSocket)       │     └──────────────────┘
//!                      └───────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, sets up logging, hosts bots until shutdown
//! - **Bot**: API calls with echo correlation and event subscription
//! - **Connection**: reconnecting WebSocket session with heartbeat liveness
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebot11::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = OneBotRuntime::new()?;
//!
//!     for bot in runtime.bots() {
//!         let replier = bot.clone();
//!         bot.on(EventCategory::Message, move |event: Arc<Event>| {
//!             let bot = replier.clone();
//!             async move {
//!                 if let Some(MessageEvent::Private(msg)) = event.as_message() {
//!                     bot.send_private_msg(msg.user_id, msg.message.clone()).await?;
//!                 }
//!                 Ok(())
//!             }
//!         });
//!     }
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `ws-client`: WebSocket transport (default)
//! - `http-client`: HTTP API transport (default)
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use onebot11_core as core;
pub use onebot11_runtime as runtime;

pub use onebot11_core::*;
pub use onebot11_runtime::{
    AppConfig, BotEntry, ConfigError, ConfigLoader, LoggingBuilder, OneBotRuntime, RuntimeBuilder,
    RuntimeError, RuntimeResult, SpanEvents, config, load_config, logging,
};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use onebot11::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use onebot11_core::prelude::*;
    pub use onebot11_runtime::prelude::*;
    pub use onebot11_runtime::{OneBotRuntime, load_config};
}
