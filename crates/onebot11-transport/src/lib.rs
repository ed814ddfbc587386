//! # OneBot v11 Transport
//!
//! Concrete transports for the OneBot v11 connection engine.
//!
//! `onebot11-core` only knows the [`Connector`](onebot11_core::Connector) and
//! [`ApiPoster`](onebot11_core::ApiPoster) traits; this crate implements them
//! on top of real network stacks. Each transport sits behind a feature flag.
//!
//! ## Features
//!
//! - `ws-client`: forward WebSocket sessions ([`WsConnector`])
//! - `http-client`: HTTP API calls ([`HttpPoster`])
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  onebot11-core      │  (Connector / ApiPoster traits)
//! ├─────────────────────┤
//! │  onebot11-transport │  <- This crate (implementations)
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebot11_core::{BotConfig, OneBotBot};
//! use onebot11_transport::WsConnector;
//!
//! let bot = OneBotBot::builder(BotConfig::websocket("ws://127.0.0.1:3001"))
//!     .connector(WsConnector::new())
//!     .build()?;
//! bot.start()?;
//! ```

#[cfg(feature = "http-client")]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

#[cfg(feature = "ws-client")]
pub use websocket::WsConnector;

#[cfg(feature = "http-client")]
pub use http::HttpPoster;
