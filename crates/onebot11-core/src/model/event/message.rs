//! Message events.
//!
//! # Hierarchy
//!
//! ```text
//! MessageEvent (message_type dispatch)
//! ├── Private(PrivateMessageEvent { sub_type, temp_source, ..MessageCommon })
//! ├── Group(GroupMessageEvent     { group_id, anonymous, sub_type, ..MessageCommon })
//! └── Other(UnrecognizedEvent)
//! ```
//!
//! Both typed variants `Deref` to [`MessageCommon`], so `event.user_id` works
//! without matching on the variant first.

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{UnrecognizedEvent, typed_or_other};
use crate::model::segment::Message;
use crate::model::types::{Anonymous, Sender};

// ============================================================================
// MessageEvent
// ============================================================================

/// Message event, selected by `message_type`.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    /// `message_type = private`.
    Private(PrivateMessageEvent),
    /// `message_type = group`.
    Group(GroupMessageEvent),
    /// Unknown or malformed message event.
    Other(UnrecognizedEvent),
}

impl MessageEvent {
    pub(crate) fn decode(message_type: Option<&str>, payload: &Value) -> Self {
        match message_type {
            Some("private") => {
                typed_or_other("message", message_type, payload, Self::Private, Self::Other)
            }
            Some("group") => {
                typed_or_other("message", message_type, payload, Self::Group, Self::Other)
            }
            _ => Self::Other(UnrecognizedEvent::new("message", message_type, payload)),
        }
    }

    /// Returns a dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Private(_) => "message.private",
            Self::Group(_) => "message.group",
            Self::Other(_) => "message.other",
        }
    }

    /// Returns the fields shared by typed message events.
    pub fn common(&self) -> Option<&MessageCommon> {
        match self {
            Self::Private(e) => Some(&e.common),
            Self::Group(e) => Some(&e.common),
            Self::Other(_) => None,
        }
    }

    /// Returns the group the message was sent in, if any.
    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Group(e) => Some(e.group_id),
            _ => None,
        }
    }

    /// Extracts the plain text of the message.
    pub fn plain_text(&self) -> String {
        self.common()
            .map(|c| c.message.plain_text())
            .unwrap_or_default()
    }
}

/// Fields shared by private and group messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCommon {
    /// Message ID.
    pub message_id: i64,
    /// Sender's user ID.
    pub user_id: i64,
    /// Message content.
    #[serde(default)]
    pub message: Message,
    /// Raw message string (CQ codes or plain text).
    #[serde(default)]
    pub raw_message: String,
    /// Font (usually 0).
    #[serde(default)]
    pub font: i32,
    /// Sender information.
    #[serde(default)]
    pub sender: Sender,
}

// ============================================================================
// PrivateMessageEvent
// ============================================================================

/// Sub-types of private messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateSubType {
    /// From a friend.
    Friend,
    /// Temporary session started from a group.
    Group,
    /// Anything else.
    Other,
}

/// Private message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageEvent {
    #[serde(flatten)]
    pub common: MessageCommon,
    /// Sub-type ("friend", "group", "other").
    #[serde(default)]
    pub sub_type: String,
    /// Source group of a temporary session.
    #[serde(default)]
    pub temp_source: Option<i64>,
}

impl PrivateMessageEvent {
    /// Classifies `sub_type`.
    pub fn sub_kind(&self) -> PrivateSubType {
        match self.sub_type.as_str() {
            "friend" => PrivateSubType::Friend,
            "group" => PrivateSubType::Group,
            _ => PrivateSubType::Other,
        }
    }
}

impl Deref for PrivateMessageEvent {
    type Target = MessageCommon;

    fn deref(&self) -> &Self::Target {
        &self.common
    }
}

// ============================================================================
// GroupMessageEvent
// ============================================================================

/// Sub-types of group messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSubType {
    /// Regular member message.
    Normal,
    /// Sent anonymously.
    Anonymous,
    /// System notice shown as a message.
    Notice,
    /// Anything else.
    Other,
}

/// Group message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    #[serde(flatten)]
    pub common: MessageCommon,
    /// Group ID.
    pub group_id: i64,
    /// Anonymous user info (if anonymous).
    #[serde(default)]
    pub anonymous: Option<Anonymous>,
    /// Sub-type ("normal", "anonymous", "notice").
    #[serde(default)]
    pub sub_type: String,
}

impl GroupMessageEvent {
    /// Classifies `sub_type`.
    pub fn sub_kind(&self) -> GroupSubType {
        match self.sub_type.as_str() {
            "normal" => GroupSubType::Normal,
            "anonymous" => GroupSubType::Anonymous,
            "notice" => GroupSubType::Notice,
            _ => GroupSubType::Other,
        }
    }
}

impl Deref for GroupMessageEvent {
    type Target = MessageCommon;

    fn deref(&self) -> &Self::Target {
        &self.common
    }
}
