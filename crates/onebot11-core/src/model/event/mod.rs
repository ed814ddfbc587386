//! OneBot v11 events.
//!
//! # Event Hierarchy
//!
//! ```text
//! Event { time, self_id, kind }                   ← header, raw frame
//! └── EventKind (post_type dispatch)
//!     ├── Message(MessageEvent)                   ← message_type
//!     │   ├── Private, Group, Other
//!     ├── Notice(NoticeEvent)                     ← notice_type
//!     │   ├── GroupUpload, GroupAdmin, …
//!     │   ├── Notify(NotifyEvent)                 ← sub_type
//!     │   │   ├── Poke, LuckyKing, Honor, Other
//!     │   └── Other
//!     ├── Request(RequestEvent)                   ← request_type
//!     │   ├── Friend, Group, Other
//!     ├── Meta(MetaEvent)                         ← meta_event_type
//!     │   ├── Lifecycle, Heartbeat, Other
//!     ├── Unknown(UnrecognizedEvent)              ← any other post_type
//!     └── Custom(CustomEvent)                     ← produced by resolvers
//! ```
//!
//! Every level has an "other" arm holding the raw payload, so a discriminator
//! the model does not know never turns into a decode failure.

pub mod message;
pub mod meta;
pub mod notice;
pub mod request;

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

pub use message::*;
pub use meta::*;
pub use notice::*;
pub use request::*;

// ============================================================================
// Event (Root Level)
// ============================================================================

/// A decoded inbound event.
///
/// Immutable once built; listeners receive it as `Arc<Event>`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unix timestamp when the event occurred.
    pub time: i64,
    /// Account the event was delivered to.
    pub self_id: i64,
    /// Kind-specific payload.
    pub kind: EventKind,
    raw: Arc<str>,
}

impl Event {
    /// Creates an event from its parts.
    pub fn new(time: i64, self_id: i64, kind: EventKind, raw: impl Into<Arc<str>>) -> Self {
        Self {
            time,
            self_id,
            kind,
            raw: raw.into(),
        }
    }

    /// Returns the top-level category.
    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }

    /// Returns a dotted name such as `message.group` or `notice.notify.poke`.
    pub fn name(&self) -> Cow<'_, str> {
        match &self.kind {
            EventKind::Message(e) => Cow::Borrowed(e.name()),
            EventKind::Notice(e) => Cow::Borrowed(e.name()),
            EventKind::Request(e) => Cow::Borrowed(e.name()),
            EventKind::Meta(e) => Cow::Borrowed(e.name()),
            EventKind::Unknown(e) => Cow::Owned(e.post_type.clone()),
            EventKind::Custom(e) => Cow::Borrowed(e.name()),
        }
    }

    /// Returns the frame this event was decoded from.
    pub fn raw_json(&self) -> &str {
        &self.raw
    }

    /// Returns the message payload, if this is a message event.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match &self.kind {
            EventKind::Message(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the heartbeat payload, if this is a heartbeat meta-event.
    pub fn as_heartbeat(&self) -> Option<&HeartbeatEvent> {
        match &self.kind {
            EventKind::Meta(MetaEvent::Heartbeat(e)) => Some(e),
            _ => None,
        }
    }
}

/// Payload of an [`Event`], selected by `post_type`.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// `post_type = message`.
    Message(MessageEvent),
    /// `post_type = notice`.
    Notice(NoticeEvent),
    /// `post_type = request`.
    Request(RequestEvent),
    /// `post_type = meta_event`.
    Meta(MetaEvent),
    /// Any other `post_type`.
    Unknown(UnrecognizedEvent),
    /// Produced by a custom [`EventResolver`](crate::resolver::EventResolver).
    Custom(CustomEvent),
}

impl EventKind {
    /// Returns the top-level category.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Message(_) => EventCategory::Message,
            Self::Notice(_) => EventCategory::Notice,
            Self::Request(_) => EventCategory::Request,
            Self::Meta(_) => EventCategory::Meta,
            Self::Unknown(_) => EventCategory::Unknown,
            Self::Custom(_) => EventCategory::Custom,
        }
    }
}

/// Top-level event categories, used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Message,
    Notice,
    Request,
    Meta,
    Unknown,
    Custom,
}

impl EventCategory {
    /// Returns the wire `post_type` for built-in categories.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta_event",
            Self::Unknown => "unknown",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fallback payloads
// ============================================================================

/// An event whose discriminator is unknown, or whose payload did not match
/// the shape its discriminator promises.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrecognizedEvent {
    /// `post_type` of the frame.
    pub post_type: String,
    /// Value of the `<post_type>_type` field (or `sub_type` for notify).
    pub sub_type: Option<String>,
    /// The whole frame object.
    pub payload: Value,
    /// Why typed decoding did not apply, when a typed shape was attempted.
    pub reason: Option<String>,
}

impl UnrecognizedEvent {
    pub(crate) fn new(post_type: &str, sub_type: Option<&str>, payload: &Value) -> Self {
        Self {
            post_type: post_type.to_string(),
            sub_type: sub_type.map(str::to_string),
            payload: payload.clone(),
            reason: None,
        }
    }
}

/// An event produced by a custom resolver.
#[derive(Clone)]
pub struct CustomEvent {
    name: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl CustomEvent {
    /// Wraps a resolver-defined payload under a dotted name.
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            payload: Arc::new(payload),
        }
    }

    /// Returns the event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrows the payload as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEvent")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Deserializes a typed payload, falling back to an [`UnrecognizedEvent`]
/// that records the failure.
pub(crate) fn typed_or_other<T, E>(
    post_type: &str,
    sub_type: Option<&str>,
    payload: &Value,
    typed: impl FnOnce(T) -> E,
    other: impl FnOnce(UnrecognizedEvent) -> E,
) -> E
where
    T: DeserializeOwned,
{
    match T::deserialize(payload) {
        Ok(event) => typed(event),
        Err(e) => {
            warn!(
                post_type = %post_type,
                sub_type = ?sub_type,
                error = %e,
                "Event payload does not match its type, keeping it unrecognized"
            );
            let mut fallback = UnrecognizedEvent::new(post_type, sub_type, payload);
            fallback.reason = Some(e.to_string());
            other(fallback)
        }
    }
}
