//! Wire codec: raw text frames ⇄ typed values.
//!
//! Decoding happens in two steps so custom resolvers can look at an event
//! before the built-in model does:
//!
//! 1. [`classify`] parses the JSON, tells events from API responses, and
//!    reads the event header (`time`, `self_id`, `post_type`, sub-type).
//! 2. [`decode_event`] turns a [`RawEvent`] into a typed [`Event`]. It never
//!    fails: unknown discriminators land in "other" arms.
//!
//! [`decode`] chains both. The codec holds no state.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::model::api::{ApiCall, ApiResponse, ApiStatus, RETCODE_ASYNC, RETCODE_SUCCESS};
use crate::model::de::{opt_string_or_number, value_to_text};
use crate::model::event::{
    Event, EventKind, MessageEvent, MetaEvent, NoticeEvent, RequestEvent, UnrecognizedEvent,
};

/// A fully decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// An event pushed by the gateway.
    Event(Event),
    /// The answer to an API call.
    Response(ApiResponse),
}

/// A classified inbound frame whose event part is not decoded yet.
#[derive(Debug, Clone)]
pub enum RawFrame {
    /// An event pushed by the gateway.
    Event(RawEvent),
    /// The answer to an API call.
    Response(ApiResponse),
}

/// An event frame with its header read and its payload still untyped.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Unix timestamp.
    pub time: i64,
    /// Receiving account.
    pub self_id: i64,
    /// Value of `post_type`.
    pub post_type: String,
    /// Value of the `<post_type>_type` field, if present.
    pub sub_type: Option<String>,
    /// The whole frame object.
    pub payload: Value,
    /// The frame text.
    pub text: Arc<str>,
}

/// Returns the name of the field that selects the sub-type of `post_type`.
pub fn sub_type_field(post_type: &str) -> String {
    format!("{post_type}_type")
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes one inbound frame.
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    Ok(match classify(raw)? {
        RawFrame::Event(event) => Frame::Event(decode_event(event)),
        RawFrame::Response(response) => Frame::Response(response),
    })
}

/// Parses a frame and decides whether it is an event or a response.
pub fn classify(raw: &str) -> Result<RawFrame, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if let Some(post_type) = object.get("post_type") {
        let post_type = post_type
            .as_str()
            .ok_or(DecodeError::missing("post_type"))?
            .to_string();
        let time = object
            .get("time")
            .and_then(Value::as_i64)
            .ok_or(DecodeError::missing("time"))?;
        let self_id = object
            .get("self_id")
            .and_then(Value::as_i64)
            .ok_or(DecodeError::missing("self_id"))?;
        let sub_type = object
            .get(&sub_type_field(&post_type))
            .and_then(Value::as_str)
            .map(str::to_string);

        return Ok(RawFrame::Event(RawEvent {
            time,
            self_id,
            post_type,
            sub_type,
            payload: Value::Object(object),
            text: Arc::from(raw),
        }));
    }

    if object.contains_key("status") || object.contains_key("retcode") {
        return decode_response(object).map(RawFrame::Response);
    }

    Err(DecodeError::Unclassified)
}

/// Builds the typed event for a classified event frame.
pub fn decode_event(raw: RawEvent) -> Event {
    let sub_type = raw.sub_type.as_deref();
    let kind = match raw.post_type.as_str() {
        "message" => EventKind::Message(MessageEvent::decode(sub_type, &raw.payload)),
        "notice" => EventKind::Notice(NoticeEvent::decode(sub_type, &raw.payload)),
        "request" => EventKind::Request(RequestEvent::decode(sub_type, &raw.payload)),
        "meta_event" => EventKind::Meta(MetaEvent::decode(sub_type, &raw.payload)),
        other => EventKind::Unknown(UnrecognizedEvent::new(other, sub_type, &raw.payload)),
    };
    Event::new(raw.time, raw.self_id, kind, raw.text)
}

/// Wire shape of a response before validation.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    retcode: Option<i64>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    wording: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    echo: Option<String>,
}

fn decode_response(object: Map<String, Value>) -> Result<ApiResponse, DecodeError> {
    let echo_hint = object.get("echo").and_then(value_to_text);
    let wire = WireResponse::deserialize(Value::Object(object)).map_err(|e| {
        DecodeError::InvalidResponse {
            echo: echo_hint,
            reason: e.to_string(),
        }
    })?;

    let status = match wire.status.as_deref() {
        Some("ok") => Some(ApiStatus::Ok),
        Some("async") => Some(ApiStatus::Async),
        Some("failed") => Some(ApiStatus::Failed),
        _ => None,
    };
    let (status, retcode) = match (status, wire.retcode) {
        (Some(status), Some(retcode)) => (status, retcode),
        (None, Some(retcode)) => (ApiStatus::from_retcode(retcode), retcode),
        (Some(ApiStatus::Ok), None) => (ApiStatus::Ok, RETCODE_SUCCESS),
        (Some(ApiStatus::Async), None) => (ApiStatus::Async, RETCODE_ASYNC),
        (Some(ApiStatus::Failed), None) | (None, None) => {
            return Err(DecodeError::InvalidResponse {
                echo: wire.echo,
                reason: "response carries no usable retcode".to_string(),
            });
        }
    };
    if status == ApiStatus::Failed && retcode == RETCODE_SUCCESS {
        return Err(DecodeError::InvalidResponse {
            echo: wire.echo,
            reason: "failed response with retcode 0".to_string(),
        });
    }

    Ok(ApiResponse {
        status,
        retcode,
        data: wire.data.filter(|data| !data.is_null()),
        message: wire.message.or(wire.msg),
        wording: wire.wording,
        echo: wire.echo,
    })
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes an outbound call as `{"action", "params", "echo"}`.
pub fn encode(call: &ApiCall) -> Result<String, serde_json::Error> {
    serde_json::to_string(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{GroupSubType, NotifyEvent};
    use serde_json::json;

    fn event(frame: Value) -> Event {
        match decode(&frame.to_string()).unwrap() {
            Frame::Event(e) => e,
            Frame::Response(r) => panic!("expected event, got {r:?}"),
        }
    }

    fn response(frame: Value) -> ApiResponse {
        match decode(&frame.to_string()).unwrap() {
            Frame::Response(r) => r,
            Frame::Event(e) => panic!("expected response, got {e:?}"),
        }
    }

    #[test]
    fn test_decode_group_message() {
        let e = event(json!({
            "time": 1700000000, "self_id": 10000, "post_type": "message",
            "message_type": "group", "sub_type": "normal", "message_id": 7,
            "group_id": 123, "user_id": 456, "font": 0,
            "message": [{"type": "text", "data": {"text": "hi"}}],
            "raw_message": "hi", "sender": {"user_id": 456, "nickname": "alice"}
        }));
        assert_eq!(e.self_id, 10000);
        assert_eq!(e.name(), "message.group");
        let Some(MessageEvent::Group(group)) = e.as_message() else {
            panic!("expected group message");
        };
        assert_eq!(group.group_id, 123);
        assert_eq!(group.user_id, 456);
        assert_eq!(group.sub_kind(), GroupSubType::Normal);
        assert_eq!(group.message.plain_text(), "hi");
    }

    #[test]
    fn test_unknown_message_subtype_is_unrecognized() {
        let e = event(json!({
            "time": 1, "self_id": 2, "post_type": "message",
            "sub_type": "unknown_future_type", "user_id": 3
        }));
        let Some(MessageEvent::Other(other)) = e.as_message() else {
            panic!("expected unrecognized message event");
        };
        assert_eq!(other.post_type, "message");
        assert_eq!(other.payload["sub_type"], "unknown_future_type");
    }

    #[test]
    fn test_malformed_typed_payload_is_unrecognized() {
        let e = event(json!({
            "time": 1, "self_id": 2, "post_type": "message",
            "message_type": "private", "message_id": "not-a-number", "user_id": 3
        }));
        let Some(MessageEvent::Other(other)) = e.as_message() else {
            panic!("expected unrecognized message event");
        };
        assert_eq!(other.sub_type.as_deref(), Some("private"));
        assert!(other.reason.is_some());
    }

    #[test]
    fn test_decode_notify_poke() {
        let e = event(json!({
            "time": 1, "self_id": 2, "post_type": "notice", "notice_type": "notify",
            "sub_type": "poke", "group_id": 9, "user_id": 3, "target_id": 2
        }));
        assert_eq!(e.name(), "notice.notify.poke");
        assert!(matches!(
            e.kind,
            EventKind::Notice(NoticeEvent::Notify(NotifyEvent::Poke(ref p))) if p.target_id == 2
        ));
    }

    #[test]
    fn test_decode_heartbeat() {
        let e = event(json!({
            "time": 1, "self_id": 2, "post_type": "meta_event",
            "meta_event_type": "heartbeat", "interval": 5000,
            "status": {"online": true, "good": true}
        }));
        let heartbeat = e.as_heartbeat().unwrap();
        assert_eq!(heartbeat.interval(), Some(std::time::Duration::from_secs(5)));
        assert_eq!(heartbeat.status.online, Some(true));
    }

    #[test]
    fn test_unknown_post_type() {
        let e = event(json!({"time": 1, "self_id": 2, "post_type": "message_sent"}));
        assert!(matches!(e.kind, EventKind::Unknown(ref u) if u.post_type == "message_sent"));
        assert_eq!(e.name(), "message_sent");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1, 2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode(r#"{"foo": 1}"#), Err(DecodeError::Unclassified)));
        assert!(matches!(
            decode(r#"{"post_type": 5, "time": 1, "self_id": 2}"#),
            Err(DecodeError::MissingField { field: "post_type" })
        ));
        assert!(matches!(
            decode(r#"{"post_type": "message", "time": 1}"#),
            Err(DecodeError::MissingField { field: "self_id" })
        ));
    }

    #[test]
    fn test_decode_response() {
        let r = response(json!({
            "status": "ok", "retcode": 0, "data": {"message_id": 42}, "echo": "1"
        }));
        assert_eq!(r.status, ApiStatus::Ok);
        assert_eq!(r.echo.as_deref(), Some("1"));
        assert_eq!(r.data, Some(json!({"message_id": 42})));
    }

    #[test]
    fn test_numeric_echo_is_normalized() {
        let r = response(json!({"status": "async", "retcode": 1, "data": null, "echo": 17}));
        assert_eq!(r.status, ApiStatus::Async);
        assert_eq!(r.echo.as_deref(), Some("17"));
        assert_eq!(r.data, None);
    }

    #[test]
    fn test_status_derived_from_retcode() {
        let r = response(json!({"status": "weird", "retcode": 1404, "msg": "nope"}));
        assert_eq!(r.status, ApiStatus::Failed);
        assert_eq!(r.message.as_deref(), Some("nope"));
    }

    #[test]
    fn test_failed_with_zero_retcode_is_rejected() {
        let result = decode(r#"{"status": "failed", "retcode": 0, "echo": "5"}"#);
        match result {
            Err(DecodeError::InvalidResponse { echo, .. }) => assert_eq!(echo.as_deref(), Some("5")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encode_omits_unset_params_and_echo() {
        let call = ApiCall::new("send_private_msg")
            .param("user_id", 1)
            .param("auto_escape", Value::Null);
        let text = encode(&call).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"action": "send_private_msg", "params": {"user_id": 1}}));

        let text = encode(&call.with_echo("9")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["echo"], "9");
    }
}
