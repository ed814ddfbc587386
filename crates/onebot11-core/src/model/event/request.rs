//! Request events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{UnrecognizedEvent, typed_or_other};

/// Request event, selected by `request_type`.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Friend request.
    Friend(FriendRequestEvent),
    /// Group join request or invitation.
    Group(GroupRequestEvent),
    /// Unknown or malformed request.
    Other(UnrecognizedEvent),
}

impl RequestEvent {
    pub(crate) fn decode(request_type: Option<&str>, payload: &Value) -> Self {
        match request_type {
            Some("friend") => {
                typed_or_other("request", request_type, payload, Self::Friend, Self::Other)
            }
            Some("group") => {
                typed_or_other("request", request_type, payload, Self::Group, Self::Other)
            }
            _ => Self::Other(UnrecognizedEvent::new("request", request_type, payload)),
        }
    }

    /// Returns a dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Friend(_) => "request.friend",
            Self::Group(_) => "request.group",
            Self::Other(_) => "request.other",
        }
    }

    /// Returns the flag needed to answer the request.
    pub fn flag(&self) -> Option<&str> {
        match self {
            Self::Friend(e) => Some(&e.flag),
            Self::Group(e) => Some(&e.flag),
            Self::Other(_) => None,
        }
    }
}

/// Friend request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequestEvent {
    pub user_id: i64,
    #[serde(default)]
    pub comment: String,
    pub flag: String,
}

/// Group join request (`sub_type = add`) or invitation (`sub_type = invite`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRequestEvent {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub comment: String,
    pub flag: String,
    pub sub_type: String,
}
