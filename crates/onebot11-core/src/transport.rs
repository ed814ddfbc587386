//! Transport seams.
//!
//! The engine never opens sockets itself. A [`Connector`] produces a framed
//! duplex session for the lifecycle manager, and an [`ApiPoster`] carries
//! single API calls over HTTP. Implementations live in `onebot11-transport`;
//! tests plug in in-memory ones.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde_json::Value;

use crate::error::{TransportError, TransportResult};

/// What a [`Connector`] needs to open a session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Gateway URL.
    pub url: String,
    /// Bearer token presented on the handshake.
    pub access_token: Option<String>,
}

impl ConnectRequest {
    /// Creates a request without a token.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
        }
    }

    /// Sets the access token.
    pub fn with_token(mut self, token: Option<impl Into<String>>) -> Self {
        self.access_token = token.map(Into::into);
        self
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A frame read from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// Transport-level ping.
    Ping,
    /// Transport-level pong.
    Pong,
    /// The peer closed the session, with an optional reason.
    Close(Option<String>),
}

/// Outbound half of a session.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a session.
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportResult<Inbound>> + Send>>;

/// An open duplex session, split into its halves.
pub struct SessionParts {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl fmt::Debug for SessionParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParts").finish_non_exhaustive()
    }
}

/// Opens duplex sessions to a gateway.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Performs the handshake and returns the session halves.
    async fn connect(&self, request: &ConnectRequest) -> TransportResult<SessionParts>;
}

/// Boxed connector.
pub type BoxedConnector = Arc<dyn Connector>;

/// Carries API calls as HTTP POST requests.
#[async_trait]
pub trait ApiPoster: Send + Sync + 'static {
    /// Posts `params` to the endpoint named `action` and returns the
    /// response body.
    async fn post(&self, action: &str, params: Value) -> TransportResult<String>;
}

/// Boxed poster.
pub type BoxedPoster = Arc<dyn ApiPoster>;
