//! HTTP API poster.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::{debug, trace};

use onebot11_core::{ApiPoster, TransportError, TransportResult};

/// Posts API calls to `{api_url}/{action}`.
///
/// The body is the params object; the gateway answers with a response
/// envelope that carries no echo.
#[derive(Clone)]
pub struct HttpPoster {
    client: Client,
    api_url: String,
    access_token: Option<String>,
}

impl HttpPoster {
    /// Creates a poster with a 30 second request timeout.
    pub fn new(api_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_timeout(api_url, Duration::from_secs(30))
    }

    /// Creates a poster with a custom request timeout.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            access_token: None,
        })
    }

    /// Sends `token` as a bearer token on every request.
    pub fn with_token(mut self, token: Option<impl Into<String>>) -> Self {
        self.access_token = token.map(Into::into);
        self
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), action)
    }
}

impl fmt::Debug for HttpPoster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPoster")
            .field("api_url", &self.api_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ApiPoster for HttpPoster {
    async fn post(&self, action: &str, params: Value) -> TransportResult<String> {
        let url = self.endpoint(action);
        trace!(url = %url, "Posting API call");

        let mut req = self.client.post(&url).json(&params);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "HTTP API call rejected");
            return Err(TransportError::Http {
                url,
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(|e| TransportError::Io(e.to_string()))
    }
}
