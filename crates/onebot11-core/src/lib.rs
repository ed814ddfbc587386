//! # OneBot v11 Core
//!
//! The connection engine of a OneBot v11 client.
//!
//! A OneBot v11 gateway exposes an IM account over a JSON protocol: it pushes
//! events (messages, notices, requests, meta-events) and answers API calls
//! correlated by an `echo` token. This crate owns everything between the
//! socket and the application:
//!
//! - **Wire codec** ([`codec`]): text frames to typed events and responses
//! - **Echo correlation** ([`EchoCorrelator`]): one outcome per API call
//! - **Connection lifecycle** ([`ConnectionManager`]): state machine,
//!   heartbeat liveness, reconnect with backoff, graceful shutdown
//! - **Event dispatch** ([`EventDispatcher`]): ordered, isolated, bounded
//!   delivery to listeners
//! - **Bot facade** ([`OneBotBot`]): the single entry point for applications
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────── OneBotBot ─────────────────┐
//!  Connector ────▶ │ ConnectionManager ──▶ codec ──┬──▶ EventDispatcher ──▶ listeners
//!  (socket)   ◀─── │        ▲                      └──▶ EchoCorrelator ──▶ callers
//!                  │        └──── encode ◀──── call_api ◀───────────────── callers
//!                  └────────────────────────────────────────────┘
//! ```
//!
//! Concrete transports live in `onebot11-transport`; this crate only sees the
//! [`Connector`] and [`ApiPoster`] traits.

pub mod bot;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod resolver;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use bot::{CallOptions, OneBotBot, OneBotBotBuilder};
pub use codec::{Frame, RawEvent, RawFrame};
pub use config::{
    BackpressurePolicy, BotConfig, DispatchConfig, HeartbeatPolicy, ReconnectPolicy,
};
pub use connection::{
    ConnectionConfig, ConnectionHandler, ConnectionManager, ConnectionState, FrameKind, StageEvent,
};
pub use correlator::{DEFAULT_CALL_TIMEOUT, EchoCorrelator, PendingCall};
pub use dispatcher::{
    DispatchStats, EventDispatcher, EventFilter, EventListener, EventStream, SubscriptionHandle,
};
pub use error::{
    BotError, BotResult, CallError, CallResult, DecodeError, TransportError, TransportResult,
};
pub use model::api::{ActionSuffix, ApiCall, ApiResponse, ApiStatus, Brand};
pub use model::event::{Event, EventCategory, EventKind};
pub use model::segment::{Message, Segment};
pub use resolver::{EventResolver, FnResolver, ResolverChain};
pub use transport::{
    ApiPoster, BoxedConnector, BoxedPoster, ConnectRequest, Connector, FrameSink, FrameStream,
    Inbound, SessionParts,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::model::api::*;
    pub use super::model::event::*;
    pub use super::model::segment::{Message, Segment};
    pub use super::{
        BotConfig, BotError, CallError, CallOptions, ConnectionState, EventFilter, OneBotBot,
        StageEvent,
    };
}
