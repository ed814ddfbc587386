//! In-memory gateway for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::transport::{ConnectRequest, Connector, FrameSink, Inbound, SessionParts};

/// Connector whose sessions are driven by the test through [`MockGateway`].
pub(crate) struct MockConnector {
    sessions: mpsc::UnboundedSender<MockGateway>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    /// Sessions get a sink that accepts one frame and then never again.
    stall_writes: bool,
    stalled: Mutex<Vec<fmpsc::Receiver<String>>>,
}

impl MockConnector {
    /// Returns the connector and the receiver of opened sessions. The first
    /// `fail_first` handshakes fail.
    pub(crate) fn new(fail_first: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<MockGateway>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions,
            failures_left: AtomicU32::new(fail_first),
            attempts: AtomicU32::new(0),
            stall_writes: false,
            stalled: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Like [`new`](Self::new), but the gateway never reads what the client
    /// writes, so the client's sink stops accepting frames.
    pub(crate) fn stalled() -> (Arc<Self>, mpsc::UnboundedReceiver<MockGateway>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sessions,
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            stall_writes: true,
            stalled: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: &ConnectRequest) -> TransportResult<SessionParts> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionFailed {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            });
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<TransportResult<Inbound>>();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded::<String>();

        let sink: FrameSink = if self.stall_writes {
            let (tx, never_read) = fmpsc::channel::<String>(0);
            self.stalled.lock().push(never_read);
            Box::pin(tx.sink_map_err(|e| TransportError::SendFailed(e.to_string())))
        } else {
            Box::pin(outbound_tx.sink_map_err(|e| TransportError::SendFailed(e.to_string())))
        };

        let gateway = MockGateway {
            request: request.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        self.sessions
            .send(gateway)
            .map_err(|_| TransportError::SendFailed("test dropped the gateway receiver".into()))?;

        Ok(SessionParts {
            sink,
            stream: Box::pin(inbound_rx),
        })
    }
}

/// Gateway side of one mock session. Dropping it ends the session.
pub(crate) struct MockGateway {
    pub(crate) request: ConnectRequest,
    inbound: fmpsc::UnboundedSender<TransportResult<Inbound>>,
    outbound: fmpsc::UnboundedReceiver<String>,
}

impl MockGateway {
    pub(crate) fn push(&self, frame: Value) {
        self.push_raw(frame.to_string());
    }

    pub(crate) fn push_raw(&self, text: impl Into<String>) {
        let _ = self.inbound.unbounded_send(Ok(Inbound::Text(text.into())));
    }

    pub(crate) fn push_inbound(&self, inbound: Inbound) {
        let _ = self.inbound.unbounded_send(Ok(inbound));
    }

    pub(crate) fn fail(&self, reason: &str) {
        let _ = self.inbound.unbounded_send(Err(TransportError::ConnectionClosed {
            reason: reason.to_string(),
        }));
    }

    /// Returns the next call the client wrote, or `None` once the client
    /// closed its side.
    pub(crate) async fn next_call(&mut self) -> Option<Value> {
        let text = self.outbound.next().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Answers `call` with a successful response carrying `data`.
    pub(crate) fn reply_ok(&self, call: &Value, data: Value) {
        self.push(json!({
            "status": "ok",
            "retcode": 0,
            "data": data,
            "echo": call["echo"],
        }));
    }

    /// Answers `call` with a failed response.
    pub(crate) fn reply_failed(&self, call: &Value, retcode: i64, message: &str) {
        self.push(json!({
            "status": "failed",
            "retcode": retcode,
            "data": null,
            "message": message,
            "echo": call["echo"],
        }));
    }
}

pub(crate) fn heartbeat(interval_ms: i64) -> Value {
    json!({
        "time": 1700000000,
        "self_id": 10001,
        "post_type": "meta_event",
        "meta_event_type": "heartbeat",
        "status": {"online": true, "good": true},
        "interval": interval_ms,
    })
}

pub(crate) fn private_message(message_id: i64, text: &str) -> Value {
    json!({
        "time": 1700000000,
        "self_id": 10001,
        "post_type": "message",
        "message_type": "private",
        "sub_type": "friend",
        "message_id": message_id,
        "user_id": 20002,
        "message": [{"type": "text", "data": {"text": text}}],
        "raw_message": text,
        "font": 0,
        "sender": {"user_id": 20002, "nickname": "alice"},
    })
}
