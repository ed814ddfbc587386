//! Error types for the OneBot v11 connection engine.
//!
//! Every failure a caller can observe is a value of one of these enums.
//! Decode failures stay inside the engine (logged and skipped); call failures
//! reach the task that issued the call; lifecycle failures reach whoever drives
//! [`OneBotBot::start`](crate::OneBotBot::start) and the stage stream.

use thiserror::Error;

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The dial or handshake did not complete.
    #[error("could not connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The peer or the network ended the stream.
    #[error("stream closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// Non-2xx answer from the HTTP API endpoint.
    #[error("HTTP request to {url} failed with status {status}")]
    Http { url: String, status: u16 },

    /// Bad URL, header value or similar, detected before connecting.
    #[error("bad transport settings: {0}")]
    InvalidConfig(String),

    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A frame could not be interpreted.
///
/// Never fatal for the connection: the reader logs it and moves on.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The frame has neither an event nor a response discriminator.
    #[error("frame carries neither `post_type` nor `status`/`retcode`")]
    Unclassified,

    /// A discriminator or header field is missing or has the wrong type.
    #[error("missing or invalid field `{field}`")]
    MissingField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// An API response violates the protocol.
    #[error("invalid API response: {reason}")]
    InvalidResponse {
        /// Echo of the offending response, when it could be read.
        echo: Option<String>,
        /// What was wrong with it.
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }
}

/// Why an action call produced no usable result.
///
/// `Clone` because one connection failure is fanned out to every pending call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The connection is not in the `connected` state.
    #[error("bot is not connected")]
    NotConnected,
    /// No response arrived before the deadline.
    #[error("no response within the call timeout")]
    Timeout,
    /// The connection was lost or shut down while the call was pending.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// The gateway answered with `status = failed`.
    #[error("gateway rejected the action with retcode {retcode}: {message}")]
    ApiFailed {
        /// Non-zero return code.
        retcode: i64,
        /// Diagnostic text from `message`/`wording`, if any.
        message: String,
    },
    /// The gateway answered with a frame that violates the protocol.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),
    /// Parameters or response data could not be (de)serialized.
    #[error("could not convert call data: {0}")]
    Serialization(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Lifecycle errors surfaced by [`OneBotBot`](crate::OneBotBot).
#[derive(Debug, Clone, Error)]
pub enum BotError {
    /// The configuration cannot produce a working bot.
    #[error("invalid bot configuration: {0}")]
    Config(String),

    /// The bot was stopped; it cannot be started again.
    #[error("bot has been stopped")]
    Terminated,

    /// Reconnection gave up after the configured number of retries.
    #[error("connectivity exhausted after {attempts} attempts")]
    ConnectivityExhausted {
        /// Reconnect attempts made after the connection was lost.
        attempts: u32,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type TransportResult<T> = Result<T, TransportError>;
pub type CallResult<T> = Result<T, CallError>;
pub type BotResult<T> = Result<T, BotError>;
