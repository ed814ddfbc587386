//! Pluggable event resolution.
//!
//! Gateways ship extensions the standard model does not know about. A
//! [`EventResolver`] gets the classified frame first and may claim it; the
//! first resolver returning `Some` wins, and unclaimed frames go to the
//! built-in model.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{self, RawEvent};
use crate::model::event::{CustomEvent, Event, EventKind};

/// Claims event frames before the built-in model.
pub trait EventResolver: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns `Ok(Some(kind))` to claim the frame, `Ok(None)` to pass.
    ///
    /// An error is logged and treated as a pass.
    fn resolve(&self, raw: &RawEvent) -> anyhow::Result<Option<EventKind>>;
}

/// Resolver built from a `post_type` and sub-type match plus a closure that
/// produces the custom payload.
///
/// ```rust,ignore
/// let resolver = FnResolver::new("notice", Some("group_msg_emoji_like"), |raw| {
///     let like: EmojiLike = serde_json::from_value(raw.payload.clone())?;
///     Ok(CustomEvent::new("notice.group_msg_emoji_like", like))
/// });
/// ```
pub struct FnResolver<F> {
    post_type: String,
    sub_type: Option<String>,
    build: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&RawEvent) -> anyhow::Result<CustomEvent> + Send + Sync + 'static,
{
    /// Matches frames with this `post_type` and, if given, this sub-type.
    pub fn new(post_type: impl Into<String>, sub_type: Option<&str>, build: F) -> Self {
        Self {
            post_type: post_type.into(),
            sub_type: sub_type.map(str::to_string),
            build,
        }
    }
}

impl<F> EventResolver for FnResolver<F>
where
    F: Fn(&RawEvent) -> anyhow::Result<CustomEvent> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.post_type
    }

    fn resolve(&self, raw: &RawEvent) -> anyhow::Result<Option<EventKind>> {
        if raw.post_type != self.post_type {
            return Ok(None);
        }
        if let Some(expected) = &self.sub_type
            && raw.sub_type.as_deref() != Some(expected.as_str())
        {
            return Ok(None);
        }
        (self.build)(raw).map(|custom| Some(EventKind::Custom(custom)))
    }
}

/// Ordered resolver list.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn EventResolver>>,
}

impl ResolverChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver. Earlier resolvers take precedence.
    pub fn push(&mut self, resolver: Arc<dyn EventResolver>) {
        self.resolvers.push(resolver);
    }

    /// Returns the number of resolvers.
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolves a classified frame into an event.
    pub fn resolve(&self, raw: RawEvent) -> Event {
        for resolver in &self.resolvers {
            match resolver.resolve(&raw) {
                Ok(Some(kind)) => return Event::new(raw.time, raw.self_id, kind, raw.text),
                Ok(None) => {}
                Err(e) => warn!(
                    resolver = resolver.name(),
                    post_type = %raw.post_type,
                    error = %e,
                    "Event resolver failed, trying the next one"
                ),
            }
        }
        codec::decode_event(raw)
    }
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawFrame;
    use crate::model::event::EventCategory;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct EmojiLike {
        message_id: i64,
        count: usize,
    }

    fn raw(frame: serde_json::Value) -> RawEvent {
        match codec::classify(&frame.to_string()).unwrap() {
            RawFrame::Event(raw) => raw,
            other => panic!("expected event, got {other:?}"),
        }
    }

    fn emoji_resolver() -> Arc<dyn EventResolver> {
        Arc::new(FnResolver::new("notice", Some("group_msg_emoji_like"), |raw: &RawEvent| {
            let message_id = raw
                .payload
                .get("message_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| anyhow::anyhow!("message_id missing"))?;
            let count = raw
                .payload
                .get("likes")
                .and_then(|v| v.as_array())
                .map_or(0, Vec::len);
            Ok(CustomEvent::new(
                "notice.group_msg_emoji_like",
                EmojiLike { message_id, count },
            ))
        }))
    }

    #[test]
    fn test_resolver_claims_extension() {
        let mut chain = ResolverChain::new();
        chain.push(emoji_resolver());

        let event = chain.resolve(raw(json!({
            "time": 1, "self_id": 2, "post_type": "notice",
            "notice_type": "group_msg_emoji_like", "group_id": 3,
            "message_id": 77, "likes": [{"emoji_id": "76", "count": 1}]
        })));

        assert_eq!(event.category(), EventCategory::Custom);
        assert_eq!(event.name(), "notice.group_msg_emoji_like");
        let EventKind::Custom(custom) = &event.kind else {
            panic!("expected custom event");
        };
        assert_eq!(
            custom.downcast_ref::<EmojiLike>(),
            Some(&EmojiLike { message_id: 77, count: 1 })
        );
    }

    #[test]
    fn test_unclaimed_falls_back_to_model() {
        let mut chain = ResolverChain::new();
        chain.push(emoji_resolver());

        let event = chain.resolve(raw(json!({
            "time": 1, "self_id": 2, "post_type": "notice",
            "notice_type": "friend_add", "user_id": 9
        })));
        assert_eq!(event.name(), "notice.friend_add");
    }

    #[test]
    fn test_failing_resolver_is_skipped() {
        let mut chain = ResolverChain::new();
        chain.push(emoji_resolver());

        let event = chain.resolve(raw(json!({
            "time": 1, "self_id": 2, "post_type": "notice",
            "notice_type": "group_msg_emoji_like", "group_id": 3
        })));
        assert_eq!(event.category(), EventCategory::Notice);
    }
}
