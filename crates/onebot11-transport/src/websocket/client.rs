//! Forward WebSocket connector.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{info, trace, warn};

use onebot11_core::{
    ConnectRequest, Connector, Inbound, SessionParts, TransportError, TransportResult,
};

/// Opens WebSocket sessions to a OneBot v11 gateway.
///
/// The access token, if any, is sent as an `Authorization: Bearer` header on
/// the handshake. `wss://` URLs use native TLS.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a new connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> TransportResult<SessionParts> {
        let failed = |reason: String| TransportError::ConnectionFailed {
            url: request.url.clone(),
            reason,
        };

        let mut handshake = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| failed(format!("invalid WebSocket request: {e}")))?;
        if let Some(token) = &request.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::InvalidConfig(format!("invalid access token: {e}")))?;
            handshake.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(url = %request.url, "Connecting to WebSocket server");
        let (ws_stream, response) = connect_async(handshake)
            .await
            .map_err(|e| failed(format!("WebSocket connection failed: {e}")))?;
        trace!(status = %response.status(), "WebSocket handshake complete");

        let (ws_tx, ws_rx) = ws_stream.split();

        let sink = ws_tx
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|text: String| {
                future::ready(Ok::<_, TransportError>(Message::Text(text.into())))
            });
        let stream = ws_rx.filter_map(|message| future::ready(to_inbound(message)));

        Ok(SessionParts {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Maps a WebSocket message onto the engine's frame model. Binary payloads
/// are read as lossy UTF-8; raw frames are skipped.
fn to_inbound(message: Result<Message, tungstenite::Error>) -> Option<TransportResult<Inbound>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => {
            let text = String::from_utf8_lossy(&data);
            if matches!(text, Cow::Owned(_)) {
                warn!(len = data.len(), "Binary frame is not valid UTF-8, decoding lossily");
            }
            Some(Ok(Inbound::Text(text.into_owned())))
        }
        Ok(Message::Ping(_)) => Some(Ok(Inbound::Ping)),
        Ok(Message::Pong(_)) => Some(Ok(Inbound::Pong)),
        Ok(Message::Close(frame)) => Some(Ok(Inbound::Close(
            frame.map(|f| f.reason.as_str().to_owned()),
        ))),
        Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::ConnectionClosed {
            reason: e.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[tokio::test]
    async fn test_session_round_trip_with_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_hdr_async(
                tcp,
                move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let auth = req
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    let _ = auth_tx.send(auth);
                    Ok(resp)
                },
            )
            .await
            .unwrap();

            ws.send(Message::Text(r#"{"post_type":"meta_event"}"#.into()))
                .await
                .unwrap();
            let call = ws.next().await.unwrap().unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
            call.into_text().unwrap().as_str().to_owned()
        });

        let request = ConnectRequest::new(format!("ws://{addr}")).with_token(Some("secret"));
        let mut parts = WsConnector::new().connect(&request).await.unwrap();

        assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer secret"));
        assert_eq!(
            parts.stream.next().await.unwrap().unwrap(),
            Inbound::Text(r#"{"post_type":"meta_event"}"#.to_string())
        );

        parts.sink.send(r#"{"action":"get_status"}"#.to_string()).await.unwrap();
        assert_eq!(
            parts.stream.next().await.unwrap().unwrap(),
            Inbound::Close(Some("bye".to_string()))
        );
        assert_eq!(server.await.unwrap(), r#"{"action":"get_status"}"#);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = ConnectRequest::new(format!("ws://{addr}"));
        match WsConnector::new().connect(&request).await {
            Err(TransportError::ConnectionFailed { url, .. }) => {
                assert_eq!(url, format!("ws://{addr}"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[test]
    fn test_to_inbound() {
        assert_eq!(
            to_inbound(Ok(Message::Ping(Vec::<u8>::new().into()))).unwrap().unwrap(),
            Inbound::Ping
        );
        assert_eq!(
            to_inbound(Ok(Message::Binary(b"{}".to_vec().into()))).unwrap().unwrap(),
            Inbound::Text("{}".to_string())
        );
        assert_eq!(
            to_inbound(Ok(Message::Binary(b"{\"a\":\"\xff\"}".to_vec().into())))
                .unwrap()
                .unwrap(),
            Inbound::Text("{\"a\":\"\u{fffd}\"}".to_string())
        );
        assert_eq!(
            to_inbound(Ok(Message::Close(None))).unwrap().unwrap(),
            Inbound::Close(None)
        );
        assert!(matches!(
            to_inbound(Err(tungstenite::Error::ConnectionClosed)),
            Some(Err(TransportError::ConnectionClosed { .. }))
        ));
    }
}
