//! Common OneBot v11 types shared by events and API payloads.

use serde::{Deserialize, Serialize};

/// Message sender information.
///
/// Every field is optional; gateways fill in what they know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sender {
    /// User ID.
    pub user_id: Option<i64>,
    /// Nickname.
    pub nickname: Option<String>,
    /// Gender ("male", "female", "unknown").
    pub sex: Option<String>,
    /// Age.
    pub age: Option<i32>,
    /// Group card (group nickname).
    pub card: Option<String>,
    /// Area.
    pub area: Option<String>,
    /// Membership level.
    pub level: Option<String>,
    /// Group role ("owner", "admin", "member").
    pub role: Option<String>,
    /// Title.
    pub title: Option<String>,
}

impl Sender {
    /// Card if set, nickname otherwise.
    pub fn display_name(&self) -> Option<&str> {
        self.card
            .as_deref()
            .filter(|card| !card.is_empty())
            .or(self.nickname.as_deref())
    }
}

/// Anonymous user information (for anonymous group messages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anonymous {
    /// Anonymous user ID.
    pub id: i64,
    /// Anonymous user name.
    pub name: String,
    /// Flag used to mute the anonymous user.
    pub flag: String,
}
