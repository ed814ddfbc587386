//! Connection lifecycle manager.
//!
//! One supervisor task per connection runs the loop
//! `connect → session → (backoff → connect)*`. A session has two halves:
//!
//! - the **reader** (the supervisor itself) takes frames in arrival order,
//!   hands them to the [`ConnectionHandler`], watches liveness and sweeps
//!   expired calls;
//! - the **writer** task owns the sink and drains a bounded queue filled by
//!   [`ConnectionManager::send`].
//!
//! Whenever a session ends, every pending call fails with
//! [`CallError::ConnectionClosed`] before anything else happens.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use super::{ConnectionConfig, ConnectionHandler, ConnectionState, FrameKind, StageEvent, StateCell};
use crate::correlator::EchoCorrelator;
use crate::error::{BotError, BotResult, CallError, CallResult};
use crate::transport::{BoxedConnector, FrameSink, Inbound, SessionParts};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Far enough in the future to act as "never" for disabled timers.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct ManagerInner {
    config: ConnectionConfig,
    connector: BoxedConnector,
    handler: Arc<dyn ConnectionHandler>,
    correlator: EchoCorrelator,
    state: StateCell,
    stages: broadcast::Sender<StageEvent>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    exhausted: Mutex<Option<u32>>,
}

/// Owns one gateway connection and keeps it alive.
///
/// Cheap to clone; clones control the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Creates a manager in the `disconnected` state. Nothing happens until
    /// [`start`](Self::start).
    pub fn new(
        config: ConnectionConfig,
        connector: BoxedConnector,
        handler: Arc<dyn ConnectionHandler>,
        correlator: EchoCorrelator,
        stages: broadcast::Sender<StageEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                handler,
                correlator,
                state: StateCell::new(),
                stages,
                outbound: Mutex::new(None),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
                started: AtomicBool::new(false),
                exhausted: Mutex::new(None),
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns the retry count after which reconnecting gave up, if it did.
    pub fn exhausted_after(&self) -> Option<u32> {
        *self.inner.exhausted.lock()
    }

    /// Spawns the supervisor. Calling it again while running is a no-op.
    ///
    /// Fails with [`BotError::Terminated`] once shutdown has begun.
    pub fn start(&self) -> BotResult<()> {
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed)
            || self.inner.shutdown.is_cancelled()
        {
            return Err(BotError::Terminated);
        }

        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.is_some() {
            return Ok(());
        }
        let span = info_span!("connection", bot = %self.inner.config.id);
        *supervisor = Some(tokio::spawn(
            Arc::clone(&self.inner).supervise().instrument(span),
        ));
        Ok(())
    }

    /// Writes one text frame.
    ///
    /// Fails with [`CallError::NotConnected`] unless the state is
    /// `connected`; no frame is queued in that case.
    pub async fn send(&self, text: String) -> CallResult<()> {
        if self.state() != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }
        let outbound = self
            .inner
            .outbound
            .lock()
            .clone()
            .ok_or(CallError::NotConnected)?;
        outbound
            .send(text)
            .await
            .map_err(|_| CallError::ConnectionClosed)
    }

    /// Shuts the connection down.
    ///
    /// Moves to `closing` (new frames are refused), waits for in-flight
    /// calls up to the grace period, fails what is left with
    /// [`CallError::ConnectionClosed`], closes the transport and ends in
    /// `closed`. Idempotent.
    pub async fn shutdown(&self) {
        match self.state() {
            ConnectionState::Closed => return,
            ConnectionState::Disconnected => {
                if self.inner.state.transition(ConnectionState::Closed) {
                    self.inner.shutdown.cancel();
                    self.inner.emit(StageEvent::Closed);
                    info!(bot = %self.inner.config.id, "Connection closed before start");
                    return;
                }
            }
            _ => {}
        }

        self.inner.state.transition(ConnectionState::Closing);
        self.inner.shutdown.cancel();

        let supervisor = self.inner.supervisor.lock().take();
        match supervisor {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(bot = %self.inner.config.id, error = %e, "Connection supervisor failed");
                    self.inner.finish();
                }
            }
            None => {
                let mut state = self.watch_state();
                let _ = state.wait_for(|s| s.is_terminal()).await;
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.inner.config.id)
            .field("url", &self.inner.config.request.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ManagerInner {
    fn emit(&self, stage: StageEvent) {
        trace!(stage = ?stage, "Lifecycle stage");
        let _ = self.stages.send(stage);
    }

    fn fail_pending(&self) {
        let failed = self.correlator.fail_all(CallError::ConnectionClosed);
        if failed > 0 {
            debug!(failed, "Failed pending calls");
        }
    }

    /// Terminal bookkeeping after a shutdown.
    fn finish(&self) {
        self.fail_pending();
        if self.state.transition(ConnectionState::Closed) {
            self.emit(StageEvent::Closed);
            info!("Connection closed");
        }
    }

    async fn supervise(self: Arc<Self>) {
        let policy = self.config.reconnect.clone();
        let mut retries_made: u32 = 0;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            attempt += 1;
            self.fail_pending();
            if !self.state.transition(ConnectionState::Connecting) {
                break;
            }
            self.emit(StageEvent::Connecting { attempt });
            info!(url = %self.config.request.url, attempt, "Connecting to gateway");

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.config.request) => result,
            };

            let reason = match connected {
                Ok(parts) => {
                    if !self.state.transition(ConnectionState::Connected) {
                        let SessionParts { mut sink, .. } = parts;
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                        break;
                    }
                    retries_made = 0;
                    attempt = 0;
                    info!(url = %self.config.request.url, "Connected to gateway");
                    self.emit(StageEvent::Connected);
                    if !self.started.swap(true, Ordering::AcqRel) {
                        self.emit(StageEvent::Started);
                    }
                    self.handler.on_connected().await;

                    match self.run_session(parts).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Err(e) => {
                    warn!(url = %self.config.request.url, error = %e, "Connection attempt failed");
                    e.to_string()
                }
            };

            if !self.state.transition(ConnectionState::Reconnecting) {
                break;
            }
            self.fail_pending();
            self.handler.on_disconnect(&reason).await;
            self.emit(StageEvent::Disconnected {
                reason: reason.clone(),
            });

            if self.shutdown.is_cancelled() {
                break;
            }
            if !policy.allows_retry(retries_made) {
                if policy.enabled {
                    error!(attempts = retries_made, reason = %reason, "Reconnect attempts exhausted, giving up");
                } else {
                    info!(reason = %reason, "Connection lost and reconnect is disabled");
                }
                *self.exhausted.lock() = Some(retries_made);
                self.state.transition(ConnectionState::Closed);
                self.emit(StageEvent::ConnectivityExhausted {
                    attempts: retries_made,
                });
                self.emit(StageEvent::Closed);
                return;
            }

            retries_made += 1;
            let delay = policy.delay_for(retries_made);
            warn!(attempt = retries_made, delay = ?delay, reason = %reason, "Reconnecting");
            self.emit(StageEvent::Reconnecting {
                attempt: retries_made,
                delay,
            });

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.finish();
    }

    async fn run_session(&self, parts: SessionParts) -> SessionEnd {
        let session_id = Uuid::new_v4();
        let SessionParts { sink, mut stream } = parts;

        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let session = CancellationToken::new();
        let writer = tokio::spawn(
            write_frames(sink, rx, session.clone())
                .instrument(info_span!("writer", session = %session_id)),
        );
        *self.outbound.lock() = Some(tx);
        debug!(session = %session_id, "Session started");

        // A fixed timeout applies from the start; a derived one waits for
        // the first heartbeat to announce its interval.
        let mut liveness = self.config.heartbeat.timeout_for(None);
        let mut last_seen = Instant::now();
        let mut draining: Option<Instant> = None;
        let mut pending = self.correlator.watch_pending();
        let mut sweep = tokio::time::interval(self.config.sweep_interval.max(Duration::from_millis(10)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let end = loop {
            if draining.is_some() && self.correlator.pending_count() == 0 {
                debug!("In-flight calls drained");
                break SessionEnd::Shutdown;
            }

            let far = Instant::now() + FAR_FUTURE;
            let stale_at = match (liveness, draining) {
                (Some(timeout), None) => Some(last_seen + timeout),
                _ => None,
            };

            tokio::select! {
                biased;

                _ = session.cancelled() => {
                    break SessionEnd::Lost("write failed".to_string());
                }
                _ = self.shutdown.cancelled(), if draining.is_none() => {
                    let grace = self.config.shutdown_grace;
                    info!(pending = self.correlator.pending_count(), grace = ?grace, "Shutting down, draining in-flight calls");
                    draining = Some(Instant::now() + grace);
                }
                _ = sleep_until(draining.unwrap_or(far)), if draining.is_some() => {
                    warn!(pending = self.correlator.pending_count(), "Shutdown grace period elapsed");
                    break SessionEnd::Shutdown;
                }
                _ = pending.changed(), if draining.is_some() => {}
                frame = stream.next() => match frame {
                    Some(Ok(Inbound::Text(text))) => {
                        if let FrameKind::Heartbeat { interval } = self.handler.on_frame(&text).await {
                            last_seen = Instant::now();
                            if let Some(timeout) = self.config.heartbeat.timeout_for(interval) {
                                if liveness != Some(timeout) {
                                    debug!(timeout = ?timeout, "Heartbeat liveness armed");
                                }
                                liveness = Some(timeout);
                            }
                        }
                    }
                    Some(Ok(Inbound::Ping | Inbound::Pong)) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Inbound::Close(reason))) => {
                        let reason = reason.unwrap_or_else(|| "closed by gateway".to_string());
                        info!(reason = %reason, "Gateway closed the connection");
                        break SessionEnd::Lost(reason);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        break SessionEnd::Lost(e.to_string());
                    }
                    None => {
                        info!("Gateway stream ended");
                        break SessionEnd::Lost("stream ended".to_string());
                    }
                },
                _ = sleep_until(stale_at.unwrap_or(far)), if stale_at.is_some() => {
                    warn!(silence = ?last_seen.elapsed(), "No heartbeat within liveness timeout, connection is stale");
                    break SessionEnd::Lost("heartbeat timeout".to_string());
                }
                _ = sweep.tick() => {
                    let expired = self.correlator.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "Expired pending calls");
                    }
                }
            }
        };

        self.outbound.lock().take();
        session.cancel();
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
        debug!(session = %session_id, "Session ended");
        end
    }
}

async fn write_frames(
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<String>,
    session: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(text) => {
                    trace!(len = text.len(), "Writing frame");
                    if let Err(e) = sink.send(text).await {
                        warn!(error = %e, "Failed to write frame");
                        session.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!("Timed out closing transport");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Frame};
    use crate::config::{BotConfig, HeartbeatPolicy, ReconnectPolicy};
    use crate::error::TransportError;
    use crate::model::api::ApiCall;
    use crate::testing::{MockConnector, MockGateway, heartbeat};
    use crate::transport::ConnectRequest;
    use async_trait::async_trait;
    use serde_json::json;

    struct CodecHandler {
        correlator: EchoCorrelator,
    }

    #[async_trait]
    impl ConnectionHandler for CodecHandler {
        async fn on_frame(&self, text: &str) -> FrameKind {
            match codec::decode(text) {
                Ok(Frame::Response(response)) => {
                    self.correlator.resolve(response);
                    FrameKind::Response
                }
                Ok(Frame::Event(event)) => match event.as_heartbeat() {
                    Some(beat) => FrameKind::Heartbeat {
                        interval: beat.interval(),
                    },
                    None => FrameKind::Event,
                },
                Err(_) => FrameKind::Invalid,
            }
        }
    }

    struct Harness {
        manager: ConnectionManager,
        correlator: EchoCorrelator,
        connector: Arc<MockConnector>,
        gateways: mpsc::UnboundedReceiver<MockGateway>,
        stages: broadcast::Receiver<StageEvent>,
    }

    fn harness(fail_first: u32, tweak: impl FnOnce(&mut ConnectionConfig)) -> Harness {
        let mut config = ConnectionConfig::new(
            ConnectRequest::new("ws://gateway.test").with_token(Some("secret")),
        );
        tweak(&mut config);
        let correlator = EchoCorrelator::default();
        let (connector, gateways) = MockConnector::new(fail_first);
        let (stages_tx, stages) = broadcast::channel(64);
        let handler = Arc::new(CodecHandler {
            correlator: correlator.clone(),
        });
        let manager = ConnectionManager::new(
            config,
            connector.clone(),
            handler,
            correlator.clone(),
            stages_tx,
        );
        Harness {
            manager,
            correlator,
            connector,
            gateways,
            stages,
        }
    }

    async fn next_stage(
        stages: &mut broadcast::Receiver<StageEvent>,
        pred: impl Fn(&StageEvent) -> bool,
    ) -> StageEvent {
        loop {
            let stage = stages.recv().await.unwrap();
            if pred(&stage) {
                return stage;
            }
        }
    }

    async fn wait_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_start_is_not_connected() {
        let h = harness(0, |_| {});
        let err = h.manager.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, CallError::NotConnected));
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let mut h = harness(0, |_| {});
        h.manager.start().unwrap();
        let mut gateway = h.gateways.recv().await.unwrap();
        assert_eq!(gateway.request.access_token.as_deref(), Some("secret"));
        wait_state(&h.manager, ConnectionState::Connected).await;

        let call = ApiCall::new("send_msg")
            .param("message_type", "private")
            .param("user_id", 20002)
            .param("message", "hi");
        let (call, pending) = h.correlator.register(call, None);
        h.manager.send(codec::encode(&call).unwrap()).await.unwrap();

        let sent = gateway.next_call().await.unwrap();
        assert_eq!(sent["action"], "send_msg");
        assert_eq!(sent["params"]["user_id"], 20002);
        gateway.reply_ok(&sent, json!({"message_id": 42}));

        let response = pending.wait().await.unwrap();
        assert_eq!(response.data, Some(json!({"message_id": 42})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_all_pending() {
        let mut h = harness(0, |_| {});
        h.manager.start().unwrap();
        let mut gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        let mut waits = Vec::new();
        for i in 0..5 {
            let (call, pending) = h.correlator.register(ApiCall::new(format!("action_{i}")), None);
            h.manager.send(codec::encode(&call).unwrap()).await.unwrap();
            waits.push(tokio::spawn(pending.wait()));
        }
        for _ in 0..5 {
            gateway.next_call().await.unwrap();
        }

        drop(gateway);
        for wait in waits {
            let result = wait.await.unwrap();
            assert!(matches!(result, Err(CallError::ConnectionClosed)));
        }
        assert_eq!(h.correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_reconnects() {
        let mut h = harness(0, |_| {});
        h.manager.start().unwrap();
        let mut gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        let (call, pending) = h.correlator.register(ApiCall::new("get_status"), None);
        h.manager.send(codec::encode(&call).unwrap()).await.unwrap();
        gateway.next_call().await.unwrap();
        let wait = tokio::spawn(pending.wait());

        gateway.fail("reset");
        assert!(matches!(wait.await.unwrap(), Err(CallError::ConnectionClosed)));

        let stage = next_stage(&mut h.stages, |s| matches!(s, StageEvent::Disconnected { .. })).await;
        let expected = TransportError::ConnectionClosed {
            reason: "reset".to_string(),
        };
        assert_eq!(
            stage,
            StageEvent::Disconnected {
                reason: expected.to_string()
            }
        );

        let _second = h.gateways.recv().await.unwrap();
        assert_eq!(h.connector.attempts(), 2);
        wait_state(&h.manager, ConnectionState::Connected).await;
        drop(gateway);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_silence_triggers_reconnect() {
        let mut h = harness(0, |c| {
            c.reconnect = ReconnectPolicy::default();
            c.heartbeat = HeartbeatPolicy::default();
        });
        h.manager.start().unwrap();
        let gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        gateway.push(heartbeat(5000));
        let silent_since = Instant::now();

        let stage = next_stage(&mut h.stages, |s| matches!(s, StageEvent::Reconnecting { .. })).await;
        let silence = silent_since.elapsed();
        assert!(silence >= Duration::from_secs(15), "reconnected after {silence:?}");
        assert!(silence < Duration::from_secs(16), "reconnected after {silence:?}");
        assert_eq!(
            stage,
            StageEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        let _second = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;
        assert_eq!(h.connector.attempts(), 2);
        drop(gateway);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_connection_alive() {
        let mut h = harness(0, |_| {});
        h.manager.start().unwrap();
        let gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        for _ in 0..10 {
            gateway.push(heartbeat(5000));
            sleep(Duration::from_secs(5)).await;
        }
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_fails_unanswered_calls() {
        let mut h = harness(0, |c| c.shutdown_grace = Duration::from_secs(2));
        h.manager.start().unwrap();
        let mut gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        let mut waits = Vec::new();
        for action in ["get_status", "get_version_info"] {
            let (call, pending) = h.correlator.register(ApiCall::new(action), None);
            h.manager.send(codec::encode(&call).unwrap()).await.unwrap();
            waits.push(tokio::spawn(pending.wait()));
        }
        gateway.next_call().await.unwrap();
        gateway.next_call().await.unwrap();

        let started = Instant::now();
        h.manager.shutdown().await;
        let took = started.elapsed();
        assert!(took >= Duration::from_secs(2) && took < Duration::from_secs(3), "took {took:?}");

        for wait in waits {
            assert!(matches!(wait.await.unwrap(), Err(CallError::ConnectionClosed)));
        }
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert!(gateway.next_call().await.is_none(), "transport should be closed");

        h.manager.shutdown().await;
        assert!(matches!(h.manager.start(), Err(BotError::Terminated)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_returns_early_when_calls_drain() {
        let mut h = harness(0, |c| c.shutdown_grace = Duration::from_secs(10));
        h.manager.start().unwrap();
        let mut gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        let (call, pending) = h.correlator.register(ApiCall::new("get_status"), None);
        h.manager.send(codec::encode(&call).unwrap()).await.unwrap();
        let wait = tokio::spawn(pending.wait());
        let sent = gateway.next_call().await.unwrap();

        let manager = h.manager.clone();
        let stopping = tokio::spawn(async move { manager.shutdown().await });
        wait_state(&h.manager, ConnectionState::Closing).await;

        let err = h.manager.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, CallError::NotConnected));

        let started = Instant::now();
        gateway.reply_ok(&sent, json!({"online": true, "good": true}));
        assert!(wait.await.unwrap().is_ok());
        stopping.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(h.manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_closes() {
        let mut h = harness(u32::MAX, |c| {
            c.reconnect = ReconnectPolicy::default().with_max_retries(2);
        });
        h.manager.start().unwrap();

        let stage = next_stage(&mut h.stages, |s| {
            matches!(s, StageEvent::ConnectivityExhausted { .. })
        })
        .await;
        assert_eq!(stage, StageEvent::ConnectivityExhausted { attempts: 2 });
        wait_state(&h.manager, ConnectionState::Closed).await;
        assert_eq!(h.manager.exhausted_after(), Some(2));
        assert_eq!(h.connector.attempts(), 3);
        assert!(matches!(h.manager.start(), Err(BotError::Terminated)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_between_failures() {
        let mut h = harness(3, |c| {
            c.reconnect = ReconnectPolicy {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(3),
                multiplier: 2.0,
                ..Default::default()
            };
        });
        h.manager.start().unwrap();

        let mut delays = Vec::new();
        for _ in 0..3 {
            if let StageEvent::Reconnecting { delay, .. } =
                next_stage(&mut h.stages, |s| matches!(s, StageEvent::Reconnecting { .. })).await
            {
                delays.push(delay);
            }
        }
        assert_eq!(
            delays,
            [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
        );

        let _gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;
        assert_eq!(h.connector.attempts(), 4);
    }

    #[tokio::test]
    async fn test_disabled_reconnect_closes_on_loss() {
        let mut h = harness(0, |c| c.reconnect = ReconnectPolicy::disabled());
        h.manager.start().unwrap();
        let gateway = h.gateways.recv().await.unwrap();
        wait_state(&h.manager, ConnectionState::Connected).await;

        gateway.push_inbound(Inbound::Close(Some("bye".to_string())));
        let stage = next_stage(&mut h.stages, |s| matches!(s, StageEvent::Disconnected { .. })).await;
        assert_eq!(
            stage,
            StageEvent::Disconnected {
                reason: "bye".to_string()
            }
        );
        wait_state(&h.manager, ConnectionState::Closed).await;
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let h = harness(0, |_| {});
        h.manager.shutdown().await;
        assert_eq!(h.manager.state(), ConnectionState::Closed);
        assert!(matches!(h.manager.start(), Err(BotError::Terminated)));
        assert_eq!(h.connector.attempts(), 0);
    }

    #[test]
    fn test_config_from_bot() {
        assert!(ConnectionConfig::from_bot(&BotConfig::http("http://127.0.0.1:3000")).is_none());
        let mut bot = BotConfig::websocket("ws://127.0.0.1:3001").with_token("t");
        bot.event_access_token = Some("ws-token".into());
        let config = ConnectionConfig::from_bot(&bot).unwrap();
        assert_eq!(config.request.access_token.as_deref(), Some("ws-token"));
    }
}
