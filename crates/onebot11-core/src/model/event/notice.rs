//! Notice events.
//!
//! # Hierarchy
//!
//! ```text
//! NoticeEvent (notice_type dispatch)
//! ├── GroupUpload, GroupAdmin, GroupDecrease, GroupIncrease, GroupBan
//! ├── FriendAdd, GroupRecall, FriendRecall
//! ├── Notify(NotifyEvent)  (sub_type dispatch)
//! │   ├── Poke, LuckyKing, Honor
//! │   └── Other
//! └── Other
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{UnrecognizedEvent, typed_or_other};

/// Notice event, selected by `notice_type`.
#[derive(Debug, Clone)]
pub enum NoticeEvent {
    /// `group_upload`
    GroupUpload(GroupUploadEvent),
    /// `group_admin`: admin granted or revoked.
    GroupAdmin(GroupAdminEvent),
    /// `group_decrease`: someone left or was removed.
    GroupDecrease(GroupDecreaseEvent),
    /// `group_increase`
    GroupIncrease(GroupIncreaseEvent),
    /// `group_ban`: mute set or lifted.
    GroupBan(GroupBanEvent),
    /// `friend_add`
    FriendAdd(FriendAddEvent),
    /// `group_recall`
    GroupRecall(GroupRecallEvent),
    /// `friend_recall`
    FriendRecall(FriendRecallEvent),
    /// `notice_type = notify`.
    Notify(NotifyEvent),
    /// Unknown or malformed notice.
    Other(UnrecognizedEvent),
}

impl NoticeEvent {
    pub(crate) fn decode(notice_type: Option<&str>, payload: &Value) -> Self {
        let t = notice_type;
        match notice_type {
            Some("group_upload") => typed_or_other("notice", t, payload, Self::GroupUpload, Self::Other),
            Some("group_admin") => typed_or_other("notice", t, payload, Self::GroupAdmin, Self::Other),
            Some("group_decrease") => {
                typed_or_other("notice", t, payload, Self::GroupDecrease, Self::Other)
            }
            Some("group_increase") => {
                typed_or_other("notice", t, payload, Self::GroupIncrease, Self::Other)
            }
            Some("group_ban") => typed_or_other("notice", t, payload, Self::GroupBan, Self::Other),
            Some("friend_add") => typed_or_other("notice", t, payload, Self::FriendAdd, Self::Other),
            Some("group_recall") => typed_or_other("notice", t, payload, Self::GroupRecall, Self::Other),
            Some("friend_recall") => {
                typed_or_other("notice", t, payload, Self::FriendRecall, Self::Other)
            }
            Some("notify") => Self::Notify(NotifyEvent::decode(payload)),
            _ => Self::Other(UnrecognizedEvent::new("notice", t, payload)),
        }
    }

    /// Returns a dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GroupUpload(_) => "notice.group_upload",
            Self::GroupAdmin(_) => "notice.group_admin",
            Self::GroupDecrease(_) => "notice.group_decrease",
            Self::GroupIncrease(_) => "notice.group_increase",
            Self::GroupBan(_) => "notice.group_ban",
            Self::FriendAdd(_) => "notice.friend_add",
            Self::GroupRecall(_) => "notice.group_recall",
            Self::FriendRecall(_) => "notice.friend_recall",
            Self::Notify(e) => e.name(),
            Self::Other(_) => "notice.other",
        }
    }
}

/// File attached to a `group_upload` notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub busid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUploadEvent {
    pub group_id: i64,
    pub user_id: i64,
    pub file: UploadedFile,
}

/// `sub_type` is `set` or `unset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAdminEvent {
    pub group_id: i64,
    pub user_id: i64,
    /// "set" or "unset".
    pub sub_type: String,
}

/// `sub_type` is `leave`, `kick` or `kick_me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDecreaseEvent {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// "leave", "kick" or "kick_me".
    pub sub_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupIncreaseEvent {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// "approve" or "invite".
    pub sub_type: String,
}

/// `duration` is in seconds; `sub_type` is `ban` or `lift_ban`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBanEvent {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// Ban duration in seconds, 0 when lifted.
    pub duration: i64,
    /// "ban" or "lift_ban".
    pub sub_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendAddEvent {
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecallEvent {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub operator_id: Option<i64>,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRecallEvent {
    pub user_id: i64,
    pub message_id: i64,
}

/// `notice_type = notify`, selected by `sub_type`.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// Poke (nudge).
    Poke(PokeEvent),
    /// Lucky king of a red packet.
    LuckyKing(LuckyKingEvent),
    /// Group honor change.
    Honor(HonorEvent),
    /// Unknown or malformed notify event.
    Other(UnrecognizedEvent),
}

impl NotifyEvent {
    fn decode(payload: &Value) -> Self {
        let sub_type = payload.get("sub_type").and_then(Value::as_str);
        match sub_type {
            Some("poke") => typed_or_other("notice", sub_type, payload, Self::Poke, Self::Other),
            Some("lucky_king") => {
                typed_or_other("notice", sub_type, payload, Self::LuckyKing, Self::Other)
            }
            Some("honor") => typed_or_other("notice", sub_type, payload, Self::Honor, Self::Other),
            _ => Self::Other(UnrecognizedEvent::new("notice", sub_type, payload)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Poke(_) => "notice.notify.poke",
            Self::LuckyKing(_) => "notice.notify.lucky_king",
            Self::Honor(_) => "notice.notify.honor",
            Self::Other(_) => "notice.notify.other",
        }
    }
}

/// Poke event. `group_id` is absent for private pokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeEvent {
    #[serde(default)]
    pub group_id: Option<i64>,
    pub user_id: i64,
    pub target_id: i64,
}

/// Red packet luck winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuckyKingEvent {
    pub group_id: i64,
    pub user_id: i64,
    pub target_id: i64,
}

/// Group honor such as the talkative badge changed hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HonorEvent {
    pub group_id: i64,
    pub user_id: i64,
    /// "talkative", "performer" or "emotion".
    pub honor_type: String,
}
