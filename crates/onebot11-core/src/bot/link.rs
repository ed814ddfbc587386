//! How a bot reaches its gateway: a managed WebSocket, or plain HTTP POSTs.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::codec::{self, RawFrame};
use crate::connection::{ConnectionManager, ConnectionState, StageEvent, StateCell};
use crate::error::{BotError, BotResult, CallError, CallResult};
use crate::model::api::{ApiCall, ApiResponse};
use crate::transport::BoxedPoster;

pub(crate) enum Link {
    Ws(ConnectionManager),
    Http(HttpLink),
}

impl Link {
    pub(crate) fn state(&self) -> ConnectionState {
        match self {
            Self::Ws(manager) => manager.state(),
            Self::Http(link) => link.state.get(),
        }
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        match self {
            Self::Ws(manager) => manager.watch_state(),
            Self::Http(link) => link.state.subscribe(),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Ws(_) => "websocket",
            Self::Http(_) => "http",
        }
    }
}

/// Stateless request/response link. "Connected" only means "started and
/// not stopped"; there is no session to lose.
///
/// Posts still running at `stop` get the grace period to finish; the rest
/// fail with [`CallError::ConnectionClosed`].
pub(crate) struct HttpLink {
    poster: BoxedPoster,
    state: StateCell,
    stages: broadcast::Sender<StageEvent>,
    in_flight: watch::Sender<usize>,
    abort: CancellationToken,
    shutdown_grace: Duration,
}

/// Counts one running post for as long as it lives.
struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl HttpLink {
    pub(crate) fn new(
        poster: BoxedPoster,
        stages: broadcast::Sender<StageEvent>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            poster,
            state: StateCell::new(),
            stages,
            in_flight: watch::Sender::new(0),
            abort: CancellationToken::new(),
            shutdown_grace,
        }
    }

    pub(crate) fn start(&self) -> BotResult<()> {
        match self.state.get() {
            ConnectionState::Disconnected => {
                self.state.transition(ConnectionState::Connecting);
                let _ = self.stages.send(StageEvent::Connecting { attempt: 1 });
                self.state.transition(ConnectionState::Connected);
                let _ = self.stages.send(StageEvent::Connected);
                let _ = self.stages.send(StageEvent::Started);
                info!("HTTP API link ready");
                Ok(())
            }
            ConnectionState::Closing | ConnectionState::Closed => Err(BotError::Terminated),
            _ => Ok(()),
        }
    }

    pub(crate) async fn shutdown(&self) {
        match self.state.get() {
            ConnectionState::Closed => return,
            ConnectionState::Closing => {
                let mut state = self.state.subscribe();
                let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
                return;
            }
            ConnectionState::Connected => {
                self.state.transition(ConnectionState::Closing);
                let mut in_flight = self.in_flight.subscribe();
                let drained = tokio::time::timeout(
                    self.shutdown_grace,
                    in_flight.wait_for(|n| *n == 0),
                )
                .await
                .is_ok();
                if !drained {
                    debug!(
                        remaining = *self.in_flight.borrow(),
                        "Grace period over, aborting HTTP calls"
                    );
                }
                self.abort.cancel();
            }
            _ => {}
        }
        if self.state.transition(ConnectionState::Closed) {
            let _ = self.stages.send(StageEvent::Closed);
            debug!("HTTP API link closed");
        }
    }

    pub(crate) async fn call(&self, call: ApiCall, timeout: Duration) -> CallResult<ApiResponse> {
        if self.state.get() != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }

        let _in_flight = InFlight::enter(&self.in_flight);
        trace!(action = %call.action, "Posting API call");
        let post = tokio::time::timeout(
            timeout,
            self.poster.post(&call.action, Value::Object(call.params)),
        );
        let body = tokio::select! {
            result = post => result.map_err(|_| CallError::Timeout)??,
            _ = self.abort.cancelled() => return Err(CallError::ConnectionClosed),
        };

        match codec::classify(&body) {
            Ok(RawFrame::Response(response)) => response.into_result(),
            Ok(RawFrame::Event(_)) => Err(CallError::InvalidResponse(
                "HTTP API answered with an event".to_string(),
            )),
            Err(e) => Err(CallError::InvalidResponse(e.to_string())),
        }
    }
}
