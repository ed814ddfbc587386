//! OneBot v11 data model.
//!
//! Events, message segments, API call/response envelopes and the typed
//! payloads returned by common actions.

pub mod api;
pub mod event;
pub mod segment;
pub mod types;

/// Lenient field deserializers shared by the model.
///
/// Gateways disagree on whether ids travel as strings or numbers; these accept
/// both and normalize to text.
pub(crate) mod de {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub(crate) fn value_to_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            value => value_to_text(&value).map(Some).ok_or_else(|| {
                D::Error::custom(format!("expected string or number, found {value}"))
            }),
        }
    }
}
