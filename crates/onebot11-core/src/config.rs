//! Engine configuration.
//!
//! These are plain runtime values (`Duration`s, not milliseconds); the
//! serializable file schema lives in `onebot11-runtime` and converts into
//! these types.

use std::time::Duration;

use crate::correlator::DEFAULT_CALL_TIMEOUT;

// =============================================================================
// Reconnect
// =============================================================================

/// Reconnection policy with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all after a connection is lost.
    pub enabled: bool,
    /// Maximum reconnection attempts (`None` for unlimited).
    pub max_retries: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Returns the delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Returns whether another retry is allowed after `retries_made`.
    pub fn allows_retry(&self, retries_made: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| retries_made < max)
    }
}

// =============================================================================
// Heartbeat
// =============================================================================

/// Liveness monitoring based on heartbeat meta-events.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatPolicy {
    /// Whether missing heartbeats trigger a reconnect.
    pub enabled: bool,
    /// Fixed liveness timeout; when `None` it is derived from the interval
    /// the gateway announces.
    pub timeout: Option<Duration>,
    /// Missed intervals tolerated before the connection is considered dead.
    pub missed_beats: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: None,
            missed_beats: 3,
        }
    }
}

impl HeartbeatPolicy {
    /// Returns the liveness timeout given the announced interval.
    pub fn timeout_for(&self, interval: Option<Duration>) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.timeout
            .or_else(|| interval.map(|interval| interval * self.missed_beats.max(1)))
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// What to do when a listener's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
    /// Wait up to `timeout` for room, then discard the incoming event.
    Block {
        /// Longest time the producer waits.
        timeout: Duration,
    },
}

/// Event dispatcher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Capacity of each listener's queue.
    pub queue_capacity: usize,
    /// Policy applied when a queue is full.
    pub policy: BackpressurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Everything a [`OneBotBot`](crate::OneBotBot) needs to run.
///
/// At least one of `event_url` (persistent WebSocket) and `api_url` (HTTP
/// POST) must be set. When `event_url` is set, API calls travel over the
/// WebSocket; `api_url` is only used when there is no WebSocket.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Identifier used in logs.
    pub id: String,
    /// WebSocket URL of the gateway.
    pub event_url: Option<String>,
    /// Base URL of the gateway's HTTP API.
    pub api_url: Option<String>,
    /// Token used when no specific token is set.
    pub access_token: Option<String>,
    /// Token for the WebSocket connection.
    pub event_access_token: Option<String>,
    /// Token for HTTP API calls.
    pub api_access_token: Option<String>,
    /// Default timeout for API calls.
    pub api_timeout: Duration,
    /// Reconnection behaviour.
    pub reconnect: ReconnectPolicy,
    /// Liveness monitoring.
    pub heartbeat: HeartbeatPolicy,
    /// Event dispatch.
    pub dispatch: DispatchConfig,
    /// How long `stop` waits for in-flight calls.
    pub shutdown_grace: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Period of the pending-call timeout sweep.
    pub sweep_interval: Duration,
    /// Query login and version info after each connect.
    pub probe_on_connect: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            id: "onebot".to_string(),
            event_url: None,
            api_url: None,
            access_token: None,
            event_access_token: None,
            api_access_token: None,
            api_timeout: DEFAULT_CALL_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            dispatch: DispatchConfig::default(),
            shutdown_grace: Duration::from_secs(5),
            outbound_buffer: 256,
            sweep_interval: Duration::from_secs(1),
            probe_on_connect: true,
        }
    }
}

impl BotConfig {
    /// Creates a config for a WebSocket gateway.
    pub fn websocket(url: impl Into<String>) -> Self {
        Self {
            event_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Creates a config for an HTTP-only gateway.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            api_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Sets the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the shared access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Token presented on the WebSocket handshake.
    pub fn effective_event_token(&self) -> Option<&str> {
        self.event_access_token
            .as_deref()
            .or(self.access_token.as_deref())
    }

    /// Token presented on HTTP API calls.
    pub fn effective_api_token(&self) -> Option<&str> {
        self.api_access_token
            .as_deref()
            .or(self.access_token.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_curve() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(500), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_limits() {
        assert!(ReconnectPolicy::default().allows_retry(10_000));
        let limited = ReconnectPolicy::default().with_max_retries(2);
        assert!(limited.allows_retry(1));
        assert!(!limited.allows_retry(2));
        assert!(!ReconnectPolicy::disabled().allows_retry(0));
    }

    #[test]
    fn test_heartbeat_timeout() {
        let policy = HeartbeatPolicy::default();
        assert_eq!(
            policy.timeout_for(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(15))
        );
        assert_eq!(policy.timeout_for(None), None);

        let fixed = HeartbeatPolicy {
            timeout: Some(Duration::from_secs(40)),
            ..Default::default()
        };
        assert_eq!(fixed.timeout_for(Some(Duration::from_secs(5))), Some(Duration::from_secs(40)));
    }

    #[test]
    fn test_token_fallback() {
        let mut config = BotConfig::websocket("ws://127.0.0.1:3001").with_token("shared");
        assert_eq!(config.effective_event_token(), Some("shared"));
        config.api_access_token = Some("api".into());
        assert_eq!(config.effective_api_token(), Some("api"));
    }
}
