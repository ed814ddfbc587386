//! Typed wrappers for the standard OneBot v11 actions.
//!
//! Each wrapper is a thin layer over [`OneBotBot::call_api`]; the action
//! name is the method name.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::OneBotBot;
use crate::error::{CallError, CallResult};
use crate::model::api::{
    ApiResponse, Credentials, FriendInfo, GetMsgResponse, GroupInfo, GroupMemberInfo, LoginInfo,
    MessageIdResponse, Status, StrangerInfo, VersionInfo,
};
use crate::model::segment::Message;

/// Reads one member of the response `data` object.
fn data_field<T: DeserializeOwned>(response: &ApiResponse, field: &str) -> CallResult<T> {
    let value = response
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .cloned()
        .ok_or_else(|| CallError::Serialization(format!("missing `{field}` in response data")))?;
    Ok(serde_json::from_value(value)?)
}

macro_rules! action {
    // acknowledged only
    ($(#[$attr:meta])* $action:ident, ($($param:ident: $ty:ty),*) $(,)?) => {
        $(#[$attr])*
        pub async fn $action(&self, $($param: $ty),*) -> CallResult<()> {
            self.call_api(stringify!($action), &json!({ $(stringify!($param): $param),* })).await?;
            Ok(())
        }
    };
    // whole `data`
    ($(#[$attr:meta])* $action:ident, ($($param:ident: $ty:ty),*) -> $out:ty $(,)?) => {
        $(#[$attr])*
        pub async fn $action(&self, $($param: $ty),*) -> CallResult<$out> {
            self.call_api(stringify!($action), &json!({ $(stringify!($param): $param),* }))
                .await?
                .data_as::<$out>()
        }
    };
    // one member of `data`
    ($(#[$attr:meta])* $action:ident, ($($param:ident: $ty:ty),*) -> $out:ty, $key:expr $(,)?) => {
        $(#[$attr])*
        pub async fn $action(&self, $($param: $ty),*) -> CallResult<$out> {
            let response = self
                .call_api(stringify!($action), &json!({ $(stringify!($param): $param),* }))
                .await?;
            data_field::<$out>(&response, $key)
        }
    };
}

impl OneBotBot {
    // messages

    /// Sends a private message and returns its id.
    ///
    /// `message` accepts anything convertible to a [`Message`], such as a
    /// `&str` or a segment list.
    pub async fn send_private_msg(
        &self,
        user_id: i64,
        message: impl Into<Message>,
    ) -> CallResult<i64> {
        let message = message.into();
        self.call_api(
            "send_private_msg",
            &json!({ "user_id": user_id, "message": message }),
        )
        .await?
        .data_as::<MessageIdResponse>()
        .map(|r| r.message_id)
    }

    /// Sends a group message and returns its id.
    pub async fn send_group_msg(
        &self,
        group_id: i64,
        message: impl Into<Message>,
    ) -> CallResult<i64> {
        let message = message.into();
        self.call_api(
            "send_group_msg",
            &json!({ "group_id": group_id, "message": message }),
        )
        .await?
        .data_as::<MessageIdResponse>()
        .map(|r| r.message_id)
    }

    /// Sends a message, letting the gateway pick the target.
    ///
    /// If both `user_id` and `group_id` are provided, `message_type` decides.
    /// Absent arguments are left out of the request.
    pub async fn send_msg(
        &self,
        message_type: Option<&str>,
        user_id: Option<i64>,
        group_id: Option<i64>,
        message: impl Into<Message>,
    ) -> CallResult<i64> {
        let params = json!({
            "message_type": message_type,
            "user_id": user_id,
            "group_id": group_id,
            "message": message.into(),
        });
        self.call_api("send_msg", &params)
            .await?
            .data_as::<MessageIdResponse>()
            .map(|r| r.message_id)
    }

    action!(
        /// Recalls a message.
        delete_msg,
        (message_id: i64)
    );

    action!(
        /// Gets a message by id.
        get_msg,
        (message_id: i64) -> GetMsgResponse
    );

    action!(
        /// Fetches the content of a merged forward by its id.
        get_forward_msg,
        (id: &str) -> Message,
        "message"
    );

    action!(
        /// Sends `times` profile likes.
        send_like,
        (user_id: i64, times: u8)
    );

    // group administration

    action!(
        /// Removes a member, optionally refusing their future join requests.
        set_group_kick,
        (group_id: i64, user_id: i64, reject_add_request: bool)
    );

    action!(
        /// Mutes a member for `duration` seconds; zero lifts the mute.
        set_group_ban,
        (group_id: i64, user_id: i64, duration: u32)
    );

    action!(
        /// Mutes an anonymous sender identified by `anonymous_flag`.
        set_group_anonymous_ban,
        (group_id: i64, anonymous_flag: &str, duration: u32)
    );

    action!(
        /// Toggles the mute-all switch.
        set_group_whole_ban,
        (group_id: i64, enable: bool)
    );

    action!(
        /// Grants or revokes admin rights.
        set_group_admin,
        (group_id: i64, user_id: i64, enable: bool)
    );

    action!(
        /// Toggles anonymous chat.
        set_group_anonymous,
        (group_id: i64, enable: bool)
    );

    action!(
        /// Sets a user's group card.
        set_group_card,
        (group_id: i64, user_id: i64, card: &str)
    );

    action!(
        set_group_name,
        (group_id: i64, group_name: &str)
    );

    action!(
        /// Leaves a group, dismissing it if `is_dismiss` and the bot owns it.
        set_group_leave,
        (group_id: i64, is_dismiss: bool)
    );

    action!(
        set_group_special_title,
        (group_id: i64, user_id: i64, special_title: &str)
    );

    // requests

    action!(
        /// Answers a friend request; `remark` applies only when approving.
        set_friend_add_request,
        (flag: &str, approve: bool, remark: &str)
    );

    action!(
        /// Answers a join request or invitation; `sub_type` is `add` or `invite`.
        set_group_add_request,
        (flag: &str, sub_type: &str, approve: bool, reason: &str)
    );

    // lookups

    action!(
        /// Account the gateway is logged in as.
        get_login_info,
        () -> LoginInfo
    );

    action!(
        get_stranger_info,
        (user_id: i64, no_cache: bool) -> StrangerInfo
    );

    action!(
        get_friend_list,
        () -> Vec<FriendInfo>
    );

    action!(
        get_group_info,
        (group_id: i64, no_cache: bool) -> GroupInfo
    );

    action!(
        get_group_list,
        () -> Vec<GroupInfo>
    );

    action!(
        get_group_member_info,
        (group_id: i64, user_id: i64, no_cache: bool) -> GroupMemberInfo
    );

    action!(
        get_group_member_list,
        (group_id: i64) -> Vec<GroupMemberInfo>
    );

    /// Gets group honor info. `honor_type` is sent as `type`.
    pub async fn get_group_honor_info(&self, group_id: i64, honor_type: &str) -> CallResult<Value> {
        let response = self
            .call_api(
                "get_group_honor_info",
                &json!({ "group_id": group_id, "type": honor_type }),
            )
            .await?;
        Ok(response.data.unwrap_or(Value::Null))
    }

    // credentials

    action!(
        get_cookies,
        (domain: &str) -> String,
        "cookies"
    );

    action!(
        get_csrf_token,
        () -> i64,
        "token"
    );

    action!(
        /// Gets cookies and the CSRF token at once.
        get_credentials,
        (domain: &str) -> Credentials
    );

    // files

    action!(
        /// Gets a voice file, converted to `out_format`.
        get_record,
        (file: &str, out_format: &str) -> String,
        "file"
    );

    action!(
        get_image,
        (file: &str) -> String,
        "file"
    );

    action!(
        can_send_image,
        () -> bool,
        "yes"
    );

    action!(
        can_send_record,
        () -> bool,
        "yes"
    );

    // gateway

    action!(
        /// Gateway health as reported by the implementation.
        get_status,
        () -> Status
    );

    action!(
        /// Implementation name and protocol version.
        get_version_info,
        () -> VersionInfo
    );

    action!(
        /// Restarts the gateway after `delay` milliseconds.
        set_restart,
        (delay: u32)
    );

    action!(
        clean_cache,
        ()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_field() {
        let response = ApiResponse::ok(json!({"cookies": "a=b", "yes": true}));
        assert_eq!(data_field::<String>(&response, "cookies").unwrap(), "a=b");
        assert!(data_field::<bool>(&response, "yes").unwrap());
        assert!(matches!(
            data_field::<i64>(&response, "token"),
            Err(CallError::Serialization(_))
        ));
        assert!(matches!(
            data_field::<i64>(&ApiResponse::ok(Value::Null), "token"),
            Err(CallError::Serialization(_))
        ));
    }
}
