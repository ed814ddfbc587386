//! Connection state machine.
//!
//! ```text
//! disconnected ──start──▶ connecting ──handshake ok──▶ connected
//!      │                    │    ▲                         │
//!      │             failed │    │ backoff elapsed         │ lost / stale
//!      │                    ▼    │                         ▼
//!      │                  reconnecting ◀───────────────────┘
//!      │                       │ retries exhausted
//!      ▼                       ▼
//!   closed ◀──── closing ◀── shutdown (from connecting, connected, reconnecting)
//! ```

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, trace};

/// Connection state, owned by the lifecycle manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started.
    #[default]
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// The session is up; API calls are accepted.
    Connected,
    /// The session was lost; waiting out the backoff delay.
    Reconnecting,
    /// Shutdown requested; draining in-flight calls.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Closing)
                | (Connected, Reconnecting)
                | (Connected, Closing)
                | (Reconnecting, Connecting)
                | (Reconnecting, Closing)
                | (Reconnecting, Closed)
                | (Closing, Closed)
        )
    }

    /// Returns whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single writer of the connection state; readers hold watch receivers.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Applies a transition if it is allowed. Returns whether it was.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        let applied = self.tx.send_if_modified(|state| {
            previous = Some(*state);
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        let from = previous.unwrap_or_default();
        if applied {
            debug!(from = %from, to = %next, "Connection state changed");
        } else {
            trace!(from = %from, to = %next, "Connection state transition rejected");
        }
        applied
    }
}
