//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use onebot11_core::{BotError, TransportError};

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A bot could not be built or started.
    #[error("Bot '{id}' failed: {source}")]
    Bot {
        id: String,
        #[source]
        source: BotError,
    },

    /// Creating a transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The bot needs a transport whose cargo feature is disabled.
    #[error("Bot '{id}' needs the {kind} transport; enable the `{feature}` feature")]
    MissingTransport {
        id: String,
        kind: &'static str,
        feature: &'static str,
    },

    /// Bot already exists.
    #[error("Bot already exists: {0}")]
    BotExists(String),

    /// Bot not found.
    #[error("Bot not found: {0}")]
    BotNotFound(String),

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(String),
}

impl RuntimeError {
    pub(crate) fn bot(id: impl Into<String>, source: BotError) -> Self {
        Self::Bot {
            id: id.into(),
            source,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
