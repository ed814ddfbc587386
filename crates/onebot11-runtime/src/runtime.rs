//! Process-level orchestration of configured bots.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use onebot11_runtime::OneBotRuntime;
//!
//! // Loads onebot.toml / onebot.yaml from the current directory
//! let runtime = OneBotRuntime::new()?;
//!
//! // Custom configuration path
//! let runtime = OneBotRuntime::builder()
//!     .config_file("config/onebot.yaml")
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, BotEntry, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use onebot11_core::OneBotBot;

/// Owns one [`OneBotBot`] per enabled configuration entry.
///
/// ```rust,ignore
/// let runtime = OneBotRuntime::new()?;
/// for bot in runtime.bots() {
///     bot.on(EventCategory::Message, |event: Arc<Event>| async move {
///         tracing::info!(?event, "Got a message");
///         Ok(())
///     });
/// }
/// runtime.run().await?;
/// ```
pub struct OneBotRuntime {
    config: AppConfig,
    bots: Vec<OneBotBot>,
    running: AtomicBool,
}

impl OneBotRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, the user config directory and `ONEBOT_*` variables.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    /// Configures where the configuration comes from.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration.
    ///
    /// Validates the configuration, initializes logging and builds every
    /// enabled bot. Nothing connects until [`start`](Self::start).
    pub fn from_config(config: &AppConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        logging::init_from_config(&config.logging);

        let bots = config
            .enabled_bots()
            .map(build_bot)
            .collect::<RuntimeResult<Vec<_>>>()?;

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            bots = bots.len(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            bots,
            running: AtomicBool::new(false),
        })
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Adds a bot built by the host, e.g. with a custom connector.
    pub fn add_bot(&mut self, bot: OneBotBot) -> RuntimeResult<()> {
        if self.bot(bot.id()).is_some() {
            return Err(RuntimeError::BotExists(bot.id().to_string()));
        }
        debug!(bot = %bot.id(), "Registered bot");
        self.bots.push(bot);
        Ok(())
    }

    /// Returns every managed bot, in configuration order.
    pub fn bots(&self) -> &[OneBotBot] {
        &self.bots
    }

    /// Returns the bot with the given id.
    pub fn bot(&self, id: &str) -> Option<&OneBotBot> {
        self.bots.iter().find(|bot| bot.id() == id)
    }

    /// Returns the bot with the given id or [`RuntimeError::BotNotFound`].
    pub fn require_bot(&self, id: &str) -> RuntimeResult<&OneBotBot> {
        self.bot(id)
            .ok_or_else(|| RuntimeError::BotNotFound(id.to_string()))
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the running flag; false if it already had the wanted value.
    fn transition(&self, running: bool) -> bool {
        self.running
            .compare_exchange(!running, running, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Starts every bot. A bot that fails to start is logged and skipped.
    pub async fn start(&self) -> RuntimeResult<()> {
        if !self.transition(true) {
            debug!("Runtime already started");
            return Ok(());
        }
        info!(bots = self.bots.len(), "Starting OneBot runtime");

        for bot in &self.bots {
            if let Err(e) = bot.start() {
                error!(bot = %bot.id(), error = %e, "Failed to start bot");
                continue;
            }
            info!(bot = %bot.id(), "Bot started");
        }

        if self.bots.is_empty() {
            warn!("No bots configured");
        }

        Ok(())
    }

    /// Stops every bot concurrently, each within its own grace period.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.transition(false) {
            debug!("Runtime not started, nothing to stop");
            return Ok(());
        }
        join_all(self.bots.iter().map(|bot| bot.stop())).await;
        info!("All bots stopped");

        Ok(())
    }

    /// Starts, waits for Ctrl+C or SIGTERM, then stops.
    ///
    /// The bots are stopped even when listening for signals fails; that
    /// error is returned afterwards.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Running, press Ctrl+C to stop");

        let signalled = wait_for_shutdown().await;
        self.stop().await?;

        signalled
    }

    /// Like [`run`](Self::run), with `shutdown` in place of the signals.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

/// Builds the bot for one configuration entry with the transports compiled
/// into this crate.
#[allow(unused_mut)]
fn build_bot(entry: &BotEntry) -> RuntimeResult<OneBotBot> {
    let config = entry.to_bot_config();
    let mut builder = OneBotBot::builder(config.clone());

    if config.event_url.is_some() {
        #[cfg(feature = "ws-client")]
        {
            builder = builder.connector(onebot11_transport::WsConnector::new());
        }
        #[cfg(not(feature = "ws-client"))]
        {
            return Err(RuntimeError::MissingTransport {
                id: entry.id.clone(),
                kind: "WebSocket",
                feature: "ws-client",
            });
        }
    } else if let Some(api_url) = &config.api_url {
        #[cfg(feature = "http-client")]
        {
            let poster =
                onebot11_transport::HttpPoster::with_timeout(api_url.clone(), config.api_timeout)?
                    .with_token(config.effective_api_token());
            builder = builder.poster(poster);
        }
        #[cfg(not(feature = "http-client"))]
        {
            let _ = api_url;
            return Err(RuntimeError::MissingTransport {
                id: entry.id.clone(),
                kind: "HTTP",
                feature: "http-client",
            });
        }
    }

    builder
        .build()
        .map_err(|e| RuntimeError::bot(&entry.id, e))
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| RuntimeError::Signal(e.to_string()))?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(|e| RuntimeError::Signal(e.to_string()))?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .map_err(|e| RuntimeError::Signal(e.to_string()))?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

/// Chooses configuration sources for a [`OneBotRuntime`].
///
/// ```rust,ignore
/// let runtime = OneBotRuntime::builder()
///     .config_file("config/onebot.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the working directory, then the user config directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new()
                .with_current_dir()
                .with_user_config_dir(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// See [`ConfigLoader::profile`].
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Ignores `ONEBOT_*` variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers `config` over every other source.
    pub fn merge(mut self, config: AppConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads, validates and builds.
    pub fn build(self) -> RuntimeResult<OneBotRuntime> {
        let config = self.config_loader.load()?;
        OneBotRuntime::from_config(&config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    fn config_with(bots: Vec<BotEntry>) -> AppConfig {
        AppConfig {
            bots,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_runtime_runs_until_shutdown() {
        let runtime = OneBotRuntime::from_config(&AppConfig::default()).unwrap();
        assert!(runtime.bots().is_empty());
        assert!(!runtime.is_running());

        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let bot = BotEntry::websocket("dup", "ws://127.0.0.1:3001");
        let result = OneBotRuntime::from_config(&config_with(vec![bot.clone(), bot]));
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::DuplicateBotId(_)))
        ));
    }

    #[tokio::test]
    async fn test_disabled_bots_are_skipped() {
        let mut bot = BotEntry::http("off", "http://127.0.0.1:3000");
        bot.enabled = false;
        let runtime = OneBotRuntime::from_config(&config_with(vec![bot])).unwrap();
        assert!(runtime.bot("off").is_none());
        assert!(matches!(
            runtime.require_bot("off"),
            Err(RuntimeError::BotNotFound(id)) if id == "off"
        ));
    }

    #[tokio::test]
    async fn test_builder_merges_config() {
        let mut bot = BotEntry::http("merged", "http://127.0.0.1:3000");
        bot.enabled = false;
        let runtime = OneBotRuntime::builder()
            .search_path("/nonexistent/onebot11")
            .without_env()
            .merge(config_with(vec![bot]))
            .build()
            .unwrap();
        assert_eq!(runtime.config().bots.len(), 1);
        assert_eq!(runtime.config().bots[0].id, "merged");
    }

    #[cfg(not(feature = "http-client"))]
    #[tokio::test]
    async fn test_missing_http_transport() {
        let bot = BotEntry::http("h", "http://127.0.0.1:3000");
        assert!(matches!(
            OneBotRuntime::from_config(&config_with(vec![bot])),
            Err(RuntimeError::MissingTransport { feature: "http-client", .. })
        ));
    }

    #[cfg(not(feature = "ws-client"))]
    #[tokio::test]
    async fn test_missing_ws_transport() {
        let bot = BotEntry::websocket("w", "ws://127.0.0.1:3001");
        assert!(matches!(
            OneBotRuntime::from_config(&config_with(vec![bot])),
            Err(RuntimeError::MissingTransport { feature: "ws-client", .. })
        ));
    }

    #[cfg(feature = "http-client")]
    #[tokio::test]
    async fn test_http_bot_lifecycle() {
        use onebot11_core::ConnectionState;

        let mut bot = BotEntry::http("h", "http://127.0.0.1:3000");
        bot.probe_on_connect = false;
        let runtime = OneBotRuntime::from_config(&config_with(vec![bot])).unwrap();

        runtime.start().await.unwrap();
        let bot = runtime.require_bot("h").unwrap();
        assert_eq!(bot.state(), ConnectionState::Connected);

        runtime.stop().await.unwrap();
        assert_eq!(bot.state(), ConnectionState::Closed);
    }
}
