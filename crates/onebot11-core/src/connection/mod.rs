//! Connection lifecycle: state machine, liveness, reconnects and shutdown.

mod lifecycle;
mod state;

use std::time::Duration;

use async_trait::async_trait;

pub use lifecycle::ConnectionManager;
pub(crate) use state::StateCell;
pub use state::ConnectionState;

use crate::config::{BotConfig, HeartbeatPolicy, ReconnectPolicy};
use crate::transport::ConnectRequest;

/// How the handler classified an inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A heartbeat meta-event, with the interval it announced.
    Heartbeat { interval: Option<Duration> },
    /// Any other event.
    Event,
    /// An API response.
    Response,
    /// A frame that could not be decoded.
    Invalid,
}

/// Receives what the connection reads.
///
/// Frames are handed over strictly in arrival order, one at a time.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called after each successful handshake.
    async fn on_connected(&self) {}

    /// Called for every inbound text frame.
    async fn on_frame(&self, text: &str) -> FrameKind;

    /// Called after a session ends, once pending calls have been failed.
    async fn on_disconnect(&self, _reason: &str) {}
}

/// Lifecycle notifications, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// A handshake attempt begins.
    Connecting { attempt: u32 },
    /// A session is up.
    Connected,
    /// The first session came up.
    Started,
    /// A session ended.
    Disconnected { reason: String },
    /// Waiting `delay` before retry number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnects were exhausted; the connection is closed for good.
    ConnectivityExhausted { attempts: u32 },
    /// The connection reached its terminal state.
    Closed,
}

/// Settings of one managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Label used in logs.
    pub id: String,
    /// Handshake target.
    pub request: ConnectRequest,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatPolicy,
    /// Longest time `shutdown` waits for in-flight calls.
    pub shutdown_grace: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Period of the pending-call timeout sweep.
    pub sweep_interval: Duration,
}

impl ConnectionConfig {
    /// Creates settings with default policies.
    pub fn new(request: ConnectRequest) -> Self {
        Self::from_parts(request, &BotConfig::default())
    }

    /// Extracts the WebSocket settings of a bot, if it has an event URL.
    pub fn from_bot(config: &BotConfig) -> Option<Self> {
        let url = config.event_url.as_ref()?;
        let request = ConnectRequest::new(url.clone()).with_token(config.effective_event_token());
        Some(Self::from_parts(request, config))
    }

    fn from_parts(request: ConnectRequest, config: &BotConfig) -> Self {
        Self {
            id: config.id.clone(),
            request,
            reconnect: config.reconnect.clone(),
            heartbeat: config.heartbeat.clone(),
            shutdown_grace: config.shutdown_grace,
            outbound_buffer: config.outbound_buffer,
            sweep_interval: config.sweep_interval,
        }
    }
}
