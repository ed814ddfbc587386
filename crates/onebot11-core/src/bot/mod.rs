//! The bot facade.
//!
//! [`OneBotBot`] ties the engine together: frames read by the connection go
//! through the codec to either the correlator (responses) or the resolver
//! chain and dispatcher (events); API calls go the other way.
//!
//! # Usage
//!
//! ```rust,ignore
//! use onebot11_core::{BotConfig, EventCategory, OneBotBot};
//!
//! let bot = OneBotBot::builder(BotConfig::websocket("ws://127.0.0.1:3001"))
//!     .connector(WsConnector::new())
//!     .build()?;
//!
//! bot.on(EventCategory::Message, |event| async move {
//!     println!("{}", event.raw_json());
//!     Ok(())
//! });
//!
//! bot.start()?;
//! bot.wait_connected().await?;
//! let message_id = bot.send_private_msg(12345678, "Hello!").await?;
//! bot.stop().await;
//! ```

mod api;
mod link;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::codec::{self, RawFrame};
use crate::config::BotConfig;
use crate::connection::{
    ConnectionConfig, ConnectionHandler, ConnectionManager, ConnectionState, FrameKind, StageEvent,
};
use crate::correlator::EchoCorrelator;
use crate::dispatcher::{
    DispatchStats, EventDispatcher, EventFilter, EventListener, EventStream, SubscriptionHandle,
};
use crate::error::{BotError, BotResult, CallError, CallResult, DecodeError};
use crate::model::api::{ActionSuffix, ApiCall, ApiResponse, Brand, LoginInfo, VersionInfo};
use crate::model::event::EventCategory;
use crate::resolver::{EventResolver, ResolverChain};
use crate::transport::{ApiPoster, BoxedConnector, BoxedPoster, Connector};

use link::{HttpLink, Link};

/// Capacity of the stage broadcast channel.
const STAGE_CHANNEL_CAPACITY: usize = 64;

/// Longest frame prefix quoted in decode warnings.
const LOGGED_FRAME_PREFIX: usize = 200;

// =============================================================================
// Call options
// =============================================================================

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Replaces the configured API timeout.
    pub timeout: Option<Duration>,
    /// Appended to the action name.
    pub suffix: Option<ActionSuffix>,
}

impl CallOptions {
    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Requests asynchronous execution (`_async`).
    pub fn asynchronous(mut self) -> Self {
        self.suffix = Some(ActionSuffix::Async);
        self
    }

    /// Requests rate-limited execution (`_rate_limited`).
    pub fn rate_limited(mut self) -> Self {
        self.suffix = Some(ActionSuffix::RateLimited);
        self
    }
}

// =============================================================================
// Frame routing
// =============================================================================

/// Routes inbound frames; shared by the connection and [`OneBotBot::push`].
struct BotCore {
    correlator: EchoCorrelator,
    dispatcher: EventDispatcher,
    resolvers: ResolverChain,
}

impl BotCore {
    async fn ingest(&self, text: &str) -> Result<FrameKind, DecodeError> {
        match codec::classify(text) {
            Ok(RawFrame::Response(response)) => {
                let echo = response.echo.clone();
                if !self.correlator.resolve(response) {
                    debug!(echo = ?echo, "Discarding response without a pending call");
                }
                Ok(FrameKind::Response)
            }
            Ok(RawFrame::Event(raw)) => {
                let event = self.resolvers.resolve(raw);
                let kind = match event.as_heartbeat() {
                    Some(beat) => {
                        trace!(interval = ?beat.interval(), "Heartbeat");
                        FrameKind::Heartbeat {
                            interval: beat.interval(),
                        }
                    }
                    None => FrameKind::Event,
                };
                self.dispatcher.dispatch(Arc::new(event)).await;
                Ok(kind)
            }
            Err(DecodeError::InvalidResponse {
                echo: Some(echo),
                reason,
            }) => {
                self.correlator
                    .fail(&echo, CallError::InvalidResponse(reason.clone()));
                Err(DecodeError::InvalidResponse {
                    echo: Some(echo),
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ConnectionHandler for BotCore {
    async fn on_frame(&self, text: &str) -> FrameKind {
        match self.ingest(text).await {
            Ok(kind) => kind,
            Err(e) => {
                let prefix: String = text.chars().take(LOGGED_FRAME_PREFIX).collect();
                warn!(error = %e, frame = %prefix, "Skipping undecodable frame");
                FrameKind::Invalid
            }
        }
    }

    async fn on_disconnect(&self, reason: &str) {
        debug!(reason = %reason, "Session ended");
    }
}

// =============================================================================
// OneBotBot
// =============================================================================

struct BotInner {
    config: BotConfig,
    core: Arc<BotCore>,
    link: Link,
    stages: broadcast::Sender<StageEvent>,
    login: RwLock<Option<LoginInfo>>,
    version: RwLock<Option<VersionInfo>>,
    probe_started: AtomicBool,
}

/// A OneBot v11 client.
///
/// Cheap to clone; clones drive the same connection.
#[derive(Clone)]
pub struct OneBotBot {
    inner: Arc<BotInner>,
}

impl OneBotBot {
    /// Starts building a bot from `config`.
    pub fn builder(config: BotConfig) -> OneBotBotBuilder {
        OneBotBotBuilder {
            config,
            connector: None,
            poster: None,
            resolvers: ResolverChain::new(),
        }
    }

    /// Returns the configured identifier.
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Starts connecting in the background. Idempotent while running.
    ///
    /// Fails with [`BotError::Terminated`] after [`stop`](Self::stop).
    pub fn start(&self) -> BotResult<()> {
        if self.inner.config.probe_on_connect
            && !self.inner.probe_started.swap(true, Ordering::AcqRel)
        {
            let stages = self.inner.stages.subscribe();
            let span = info_span!("probe", bot = %self.id());
            tokio::spawn(run_probe(Arc::downgrade(&self.inner), stages).instrument(span));
        }

        match &self.inner.link {
            Link::Ws(manager) => manager.start(),
            Link::Http(link) => link.start(),
        }
    }

    /// Stops the bot: drains in-flight calls within the grace period, closes
    /// the connection and lets listeners finish their queues. Idempotent.
    pub async fn stop(&self) {
        info!(bot = %self.id(), "Stopping bot");
        match &self.inner.link {
            Link::Ws(manager) => manager.shutdown().await,
            Link::Http(link) => link.shutdown().await,
        }
        self.inner
            .core
            .dispatcher
            .close(self.inner.config.shutdown_grace)
            .await;
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.link.state()
    }

    /// Returns a receiver observing every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.link.watch_state()
    }

    /// Returns whether API calls are currently accepted.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits until the state is `connected`.
    ///
    /// Fails if the connection closes first, with
    /// [`BotError::ConnectivityExhausted`] when reconnecting gave up.
    pub async fn wait_connected(&self) -> BotResult<()> {
        let mut state = self.watch_state();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(self.terminal_error());
                }
                _ => {}
            }
            if state.changed().await.is_err() {
                return Err(self.terminal_error());
            }
        }
    }

    fn terminal_error(&self) -> BotError {
        match &self.inner.link {
            Link::Ws(manager) => match manager.exhausted_after() {
                Some(attempts) => BotError::ConnectivityExhausted { attempts },
                None => BotError::Terminated,
            },
            Link::Http(_) => BotError::Terminated,
        }
    }

    /// Subscribes to lifecycle notifications.
    pub fn stages(&self) -> broadcast::Receiver<StageEvent> {
        self.inner.stages.subscribe()
    }

    // -------------------------------------------------------------------------
    // API calls
    // -------------------------------------------------------------------------

    /// Calls `action` with `params` and returns the gateway's response.
    ///
    /// `params` must serialize to a JSON object (or to nothing, e.g. `&()`).
    /// Protocol failures are values: [`CallError::NotConnected`],
    /// [`CallError::Timeout`], [`CallError::ApiFailed`] and friends.
    pub async fn call_api<P>(&self, action: &str, params: &P) -> CallResult<ApiResponse>
    where
        P: Serialize + ?Sized,
    {
        self.call_api_with(action, params, CallOptions::default())
            .await
    }

    /// Like [`call_api`](Self::call_api), with per-call options.
    pub async fn call_api_with<P>(
        &self,
        action: &str,
        params: &P,
        options: CallOptions,
    ) -> CallResult<ApiResponse>
    where
        P: Serialize + ?Sized,
    {
        let call = ApiCall::with_params(action, params)?;
        self.send_call(call, options).await
    }

    /// Calls `action` and decodes the response `data` into `T`.
    pub async fn call<T, P>(&self, action: &str, params: &P) -> CallResult<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.call_api(action, params).await?.data_as()
    }

    /// Sends a prepared [`ApiCall`]. Its `echo` is replaced.
    pub async fn send_call(&self, call: ApiCall, options: CallOptions) -> CallResult<ApiResponse> {
        let call = match options.suffix {
            Some(suffix) => call.with_suffix(suffix),
            None => call,
        };
        let timeout = options.timeout.unwrap_or(self.inner.config.api_timeout);

        match &self.inner.link {
            Link::Ws(manager) => {
                if manager.state() != ConnectionState::Connected {
                    return Err(CallError::NotConnected);
                }
                let (call, pending) = self.inner.core.correlator.register(call, Some(timeout));
                let text = codec::encode(&call)?;
                debug!(action = %call.action, echo = %pending.echo(), "Calling API");
                trace!(request = %text, "API request");

                // A stalled writer can keep the queue full; the deadline
                // covers the enqueue too. Dropping `pending` retires the entry.
                tokio::time::timeout_at(pending.deadline(), manager.send(text))
                    .await
                    .map_err(|_| CallError::Timeout)??;
                let response = pending.wait().await;
                if let Err(e) = &response {
                    debug!(action = %call.action, error = %e, "API call failed");
                }
                response
            }
            Link::Http(link) => {
                debug!(action = %call.action, "Calling API over HTTP");
                link.call(call, timeout).await
            }
        }
    }

    /// Returns the number of calls waiting for a response.
    pub fn pending_call_count(&self) -> usize {
        self.inner.core.correlator.pending_count()
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Registers a listener for one event category.
    pub fn on<L: EventListener>(&self, category: EventCategory, listener: L) -> SubscriptionHandle {
        self.subscribe(EventFilter::Category(category), listener)
    }

    /// Registers a listener for every event.
    pub fn on_any<L: EventListener>(&self, listener: L) -> SubscriptionHandle {
        self.subscribe(EventFilter::Any, listener)
    }

    /// Registers a listener with an explicit filter.
    pub fn subscribe<L: EventListener>(&self, filter: EventFilter, listener: L) -> SubscriptionHandle {
        self.inner.core.dispatcher.subscribe(filter, listener)
    }

    /// Opens a pull-based stream of every event.
    pub fn events(&self) -> EventStream {
        self.events_matching(EventFilter::Any)
    }

    /// Opens a pull-based stream of matching events.
    pub fn events_matching(&self, filter: EventFilter) -> EventStream {
        self.inner.core.dispatcher.stream(filter)
    }

    /// Feeds a raw frame through the inbound path, as if the gateway had
    /// sent it.
    pub async fn push(&self, raw: &str) -> Result<(), DecodeError> {
        self.inner.core.ingest(raw).await.map(|_| ())
    }

    /// Returns dispatcher counters.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.core.dispatcher.stats()
    }

    // -------------------------------------------------------------------------
    // Gateway info
    // -------------------------------------------------------------------------

    /// Returns the login info fetched after the last connect.
    pub fn login_info(&self) -> Option<LoginInfo> {
        self.inner.login.read().clone()
    }

    /// Returns the account id, once known.
    pub fn self_id(&self) -> Option<i64> {
        self.inner.login.read().as_ref().map(|info| info.user_id)
    }

    /// Returns the version info fetched after the last connect.
    pub fn version_info(&self) -> Option<VersionInfo> {
        self.inner.version.read().clone()
    }

    /// Returns the detected gateway implementation.
    pub fn brand(&self) -> Brand {
        self.inner
            .version
            .read()
            .as_ref()
            .map(VersionInfo::brand)
            .unwrap_or_default()
    }

    async fn probe(&self) {
        match self.get_login_info().await {
            Ok(info) => {
                info!(user_id = info.user_id, nickname = %info.nickname, "Logged in");
                *self.inner.login.write() = Some(info);
            }
            Err(e) => warn!(error = %e, "Failed to fetch login info"),
        }
        match self.get_version_info().await {
            Ok(version) => {
                info!(
                    app_name = %version.app_name,
                    app_version = %version.app_version,
                    brand = ?version.brand(),
                    "Gateway identified"
                );
                *self.inner.version.write() = Some(version);
            }
            Err(e) => warn!(error = %e, "Failed to fetch version info"),
        }
    }
}

impl fmt::Debug for OneBotBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneBotBot")
            .field("id", &self.id())
            .field("link", &self.inner.link.kind())
            .field("state", &self.state())
            .field("pending_calls", &self.pending_call_count())
            .finish()
    }
}

/// Probes the gateway after every connect until the bot closes or is
/// dropped.
async fn run_probe(bot: Weak<BotInner>, mut stages: broadcast::Receiver<StageEvent>) {
    loop {
        match stages.recv().await {
            Ok(StageEvent::Connected) => {
                let Some(inner) = bot.upgrade() else {
                    break;
                };
                OneBotBot { inner }.probe().await;
            }
            Ok(StageEvent::Closed) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                trace!(skipped, "Probe lagged behind stage events");
            }
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`OneBotBot`].
pub struct OneBotBotBuilder {
    config: BotConfig,
    connector: Option<BoxedConnector>,
    poster: Option<BoxedPoster>,
    resolvers: ResolverChain,
}

impl OneBotBotBuilder {
    /// Sets the WebSocket connector. Required when `event_url` is set.
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets a shared connector.
    pub fn shared_connector(mut self, connector: BoxedConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the HTTP poster. Required when only `api_url` is set.
    pub fn poster<P: ApiPoster>(mut self, poster: P) -> Self {
        self.poster = Some(Arc::new(poster));
        self
    }

    /// Sets a shared poster.
    pub fn shared_poster(mut self, poster: BoxedPoster) -> Self {
        self.poster = Some(poster);
        self
    }

    /// Appends a custom event resolver. Earlier resolvers take precedence.
    pub fn resolver<R: EventResolver>(mut self, resolver: R) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Builds the bot. Nothing connects until [`OneBotBot::start`].
    pub fn build(self) -> BotResult<OneBotBot> {
        let config = self.config;
        let (stages, _) = broadcast::channel(STAGE_CHANNEL_CAPACITY);
        let correlator = EchoCorrelator::new(config.api_timeout);
        let core = Arc::new(BotCore {
            correlator: correlator.clone(),
            dispatcher: EventDispatcher::new(config.dispatch.clone()),
            resolvers: self.resolvers,
        });

        let link = if let Some(connection) = ConnectionConfig::from_bot(&config) {
            let connector = self.connector.ok_or_else(|| {
                BotError::Config(format!(
                    "bot '{}' has an event URL but no connector",
                    config.id
                ))
            })?;
            Link::Ws(ConnectionManager::new(
                connection,
                connector,
                core.clone(),
                correlator,
                stages.clone(),
            ))
        } else if config.api_url.is_some() {
            let poster = self.poster.ok_or_else(|| {
                BotError::Config(format!("bot '{}' has an API URL but no poster", config.id))
            })?;
            Link::Http(HttpLink::new(poster, stages.clone(), config.shutdown_grace))
        } else {
            return Err(BotError::Config(format!(
                "bot '{}' needs an event URL or an API URL",
                config.id
            )));
        };

        debug!(bot = %config.id, link = link.kind(), "Bot built");
        Ok(OneBotBot {
            inner: Arc::new(BotInner {
                config,
                core,
                link,
                stages,
                login: RwLock::new(None),
                version: RwLock::new(None),
                probe_started: AtomicBool::new(false),
            }),
        })
    }
}
