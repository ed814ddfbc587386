//! API call and response envelopes, plus typed payloads for common actions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::segment::Message;
use crate::error::{CallError, CallResult};

/// `retcode` of a successful call.
pub const RETCODE_SUCCESS: i64 = 0;

/// `retcode` of a call accepted for asynchronous execution.
pub const RETCODE_ASYNC: i64 = 1;

// =============================================================================
// ApiCall
// =============================================================================

/// An outbound API invocation.
///
/// `echo` is left empty by callers; the correlator assigns it on
/// registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCall {
    /// Protocol action name, e.g. `send_private_msg`.
    pub action: String,
    /// Parameters; unset values are never present.
    pub params: Map<String, Value>,
    /// Correlation token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl ApiCall {
    /// Creates a call without parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
            echo: None,
        }
    }

    /// Creates a call from any serializable parameter value.
    ///
    /// `params` must serialize to an object (or to nothing, e.g. `()`);
    /// `null` members are dropped.
    pub fn with_params<P: Serialize + ?Sized>(
        action: impl Into<String>,
        params: &P,
    ) -> CallResult<Self> {
        let params = match serde_json::to_value(params)? {
            Value::Null => Map::new(),
            Value::Object(mut map) => {
                map.retain(|_, value| !value.is_null());
                map
            }
            other => {
                return Err(CallError::Serialization(format!(
                    "API params must be a JSON object, got {other}"
                )));
            }
        };
        Ok(Self {
            action: action.into(),
            params,
            echo: None,
        })
    }

    /// Adds one parameter, builder style. `null` values are ignored.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.params.insert(key.into(), value);
        }
        self
    }

    /// Appends a rate-limit/async suffix to the action name.
    pub fn with_suffix(mut self, suffix: ActionSuffix) -> Self {
        self.action.push_str(suffix.as_str());
        self
    }

    /// Sets the echo token.
    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = Some(echo.into());
        self
    }
}

/// Action name suffixes understood by OneBot v11 gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSuffix {
    /// Execute asynchronously; the gateway answers with `status = async`.
    Async,
    /// Queue behind the gateway's rate limiter.
    RateLimited,
}

impl ActionSuffix {
    /// Returns the suffix text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Async => "_async",
            Self::RateLimited => "_rate_limited",
        }
    }
}

// =============================================================================
// ApiResponse
// =============================================================================

/// Outcome reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    /// Executed successfully.
    Ok,
    /// Accepted for asynchronous execution.
    Async,
    /// Failed; `retcode` is non-zero.
    Failed,
}

impl ApiStatus {
    /// Derives a status from a return code alone.
    pub fn from_retcode(retcode: i64) -> Self {
        match retcode {
            RETCODE_SUCCESS => Self::Ok,
            RETCODE_ASYNC => Self::Async,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Async => "async",
            Self::Failed => "failed",
        })
    }
}

/// An inbound API response.
///
/// Built by [`codec`](crate::codec), which guarantees that a `Failed` status
/// carries a non-zero `retcode`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// Outcome.
    pub status: ApiStatus,
    /// Return code.
    pub retcode: i64,
    /// Action result, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Diagnostic message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Human-readable diagnostic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
    /// Echo of the originating call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl ApiResponse {
    /// Creates a successful response carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            status: ApiStatus::Ok,
            retcode: RETCODE_SUCCESS,
            data: Some(data),
            message: None,
            wording: None,
            echo: None,
        }
    }

    /// Returns `true` unless the status is `failed`.
    pub fn is_success(&self) -> bool {
        self.status != ApiStatus::Failed
    }

    /// Turns a `failed` response into [`CallError::ApiFailed`].
    pub fn into_result(self) -> CallResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CallError::ApiFailed {
                retcode: self.retcode,
                message: self
                    .wording
                    .or(self.message)
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    /// Deserializes `data` into `T`; a missing `data` is read as `null`.
    pub fn data_as<T: DeserializeOwned>(&self) -> CallResult<T> {
        let data = self.data.as_ref().unwrap_or(&Value::Null);
        Ok(T::deserialize(data)?)
    }
}

// =============================================================================
// Typed payloads
// =============================================================================

/// `data` of the send-message family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageIdResponse {
    /// ID of the sent message.
    pub message_id: i64,
}

/// Sender information in API responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSender {
    pub user_id: i64,
    pub nickname: String,
    pub sex: String,
    pub age: i32,
    pub card: Option<String>,
    pub level: Option<String>,
    pub role: Option<String>,
    pub title: Option<String>,
}

/// `data` of `get_msg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMsgResponse {
    pub message_id: i64,
    #[serde(default)]
    pub real_id: Option<i64>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub sender: ApiSender,
    pub time: i64,
    #[serde(default)]
    pub message: Message,
}

/// `data` of `get_login_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    /// The bot account.
    pub user_id: i64,
    /// The bot nickname.
    #[serde(default)]
    pub nickname: String,
}

/// `data` of `get_stranger_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrangerInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub age: i32,
}

/// Element of `get_friend_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}

/// `data` of `get_group_info`, element of `get_group_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub member_count: i32,
    #[serde(default)]
    pub max_member_count: i32,
}

/// `data` of `get_group_member_info`, element of `get_group_member_list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMemberInfo {
    pub group_id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub card: String,
    pub sex: String,
    pub age: i32,
    pub area: String,
    pub join_time: i64,
    pub last_sent_time: i64,
    pub level: String,
    /// "owner", "admin" or "member".
    pub role: String,
    pub unfriendly: bool,
    pub title: String,
    pub title_expire_time: i64,
    pub card_changeable: bool,
}

/// `data` of `get_credentials`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub cookies: String,
    pub csrf_token: i64,
}

/// `data` of `can_send_image` and `can_send_record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSend {
    /// Whether the capability is available.
    pub yes: bool,
}

/// `data` of `get_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub good: bool,
    /// Implementation-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `data` of `get_version_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub protocol_version: String,
    /// Implementation-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionInfo {
    /// Detects the gateway implementation from `app_name`.
    pub fn brand(&self) -> Brand {
        Brand::from_app_name(&self.app_name)
    }
}

/// Known gateway implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Brand {
    /// LLOneBot.
    LlOneBot,
    /// Lagrange.OneBot.
    Lagrange,
    /// Not detected yet, or not recognized.
    #[default]
    Unknown,
}

impl Brand {
    /// Matches `app_name` case-insensitively.
    pub fn from_app_name(app_name: &str) -> Self {
        let name = app_name.to_ascii_lowercase();
        if name.contains("llonebot") {
            Self::LlOneBot
        } else if name.contains("lagrange") {
            Self::Lagrange
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct KickParams {
        group_id: i64,
        user_id: i64,
        reject_add_request: Option<bool>,
    }

    #[test]
    fn test_with_params_drops_unset_members() {
        let call = ApiCall::with_params(
            "set_group_kick",
            &KickParams {
                group_id: 1,
                user_id: 2,
                reject_add_request: None,
            },
        )
        .unwrap();
        assert_eq!(call.params.len(), 2);
        assert!(!call.params.contains_key("reject_add_request"));
    }

    #[test]
    fn test_with_params_rejects_non_objects() {
        let result = ApiCall::with_params("get_status", &[1, 2, 3]);
        assert!(matches!(result, Err(CallError::Serialization(_))));

        let call = ApiCall::with_params("get_status", &()).unwrap();
        assert!(call.params.is_empty());
    }

    #[test]
    fn test_suffix() {
        let call = ApiCall::new("send_msg").with_suffix(ActionSuffix::RateLimited);
        assert_eq!(call.action, "send_msg_rate_limited");
    }

    #[test]
    fn test_failed_response_into_result() {
        let response = ApiResponse {
            status: ApiStatus::Failed,
            retcode: 100,
            data: None,
            message: Some("bad param".into()),
            wording: None,
            echo: None,
        };
        match response.into_result() {
            Err(CallError::ApiFailed { retcode, message }) => {
                assert_eq!(retcode, 100);
                assert_eq!(message, "bad param");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_data_as() {
        let response = ApiResponse::ok(json!({"message_id": 42}));
        let data: MessageIdResponse = response.data_as().unwrap();
        assert_eq!(data.message_id, 42);
    }

    #[test]
    fn test_brand_detection() {
        assert_eq!(Brand::from_app_name("LLOneBot"), Brand::LlOneBot);
        assert_eq!(Brand::from_app_name("Lagrange.OneBot"), Brand::Lagrange);
        assert_eq!(Brand::from_app_name("NapCat.Onebot"), Brand::Unknown);
    }
}
