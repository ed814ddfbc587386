//! Meta events: connection health reported by the gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{UnrecognizedEvent, typed_or_other};

/// Meta event, selected by `meta_event_type`.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    /// Lifecycle change.
    Lifecycle(LifecycleEvent),
    /// Periodic heartbeat.
    Heartbeat(HeartbeatEvent),
    /// Unknown or malformed meta event.
    Other(UnrecognizedEvent),
}

impl MetaEvent {
    pub(crate) fn decode(meta_event_type: Option<&str>, payload: &Value) -> Self {
        let t = meta_event_type;
        match meta_event_type {
            Some("lifecycle") => {
                typed_or_other("meta_event", t, payload, Self::Lifecycle, Self::Other)
            }
            Some("heartbeat") => {
                typed_or_other("meta_event", t, payload, Self::Heartbeat, Self::Other)
            }
            _ => Self::Other(UnrecognizedEvent::new("meta_event", t, payload)),
        }
    }

    /// Returns a dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lifecycle(_) => "meta_event.lifecycle",
            Self::Heartbeat(_) => "meta_event.heartbeat",
            Self::Other(_) => "meta_event.other",
        }
    }
}

/// Lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// "enable", "disable" or "connect".
    pub sub_type: String,
}

/// Heartbeat status info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatStatus {
    pub app_initialized: Option<bool>,
    pub app_enabled: Option<bool>,
    pub app_good: Option<bool>,
    pub online: Option<bool>,
    pub good: Option<bool>,
    /// Implementation-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Heartbeat event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    #[serde(default)]
    pub status: HeartbeatStatus,
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub interval: i64,
}

impl HeartbeatEvent {
    /// Returns the announced interval, if positive.
    pub fn interval(&self) -> Option<Duration> {
        u64::try_from(self.interval)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
