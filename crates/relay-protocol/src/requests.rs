//! Request variants accepted by the relay.
//!
//! Each operation the relay exposes is an explicit variant of [`Request`], so
//! a host can route any transport's input through one `match`.

use crate::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// Post a structured chat message to a channel or a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChat {
    /// Token of the sending subscription.
    pub from: String,
    /// Target channel.
    pub channel: String,
    /// Recipient user id for a direct message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    /// Message text, before encoding.
    pub message: String,
    /// Client-side routing hint, forwarded unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl PostChat {
    /// Create a public chat post.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            channel: channel.into(),
            to_user_id: None,
            message: message.into(),
            selector: None,
        }
    }

    /// Address the post to a single user.
    #[must_use]
    pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    /// Attach a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Post a raw notification (remote control) to a channel or a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRaw {
    /// Token of the sending subscription.
    pub from: String,
    /// Target channel.
    pub channel: String,
    /// Recipient user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    /// Notification body, before encoding.
    pub message: String,
    /// Client-side routing hint, forwarded unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl PostRaw {
    /// Create a raw channel notification.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            channel: channel.into(),
            to_user_id: None,
            message: message.into(),
            selector: None,
        }
    }

    /// Address the notification to a single user.
    #[must_use]
    pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    /// Attach a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// Query recent history across channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHistory {
    /// Channels to merge.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Only messages with a greater id are returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<u64>,
    /// Per-channel limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
}

/// History query result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Messages ordered ascending by id.
    pub results: Vec<ChatMessage>,
}

/// A request to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Structured chat message.
    PostChat(PostChat),
    /// Raw notification.
    PostRaw(PostRaw),
    /// Multi-channel history query.
    GetHistory(GetHistory),
    /// Flush all history.
    ClearHistory,
    /// Drop every live subscription.
    ResetSubscriptions,
}

/// The result of a handled [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// The constructed chat message.
    Chat(ChatMessage),
    /// History results.
    History(HistoryResponse),
    /// No content.
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let req = Request::PostChat(PostChat::new("sub_1", "home", "hi").to_user("u2"));
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["type"], "postChat");
        assert_eq!(json["toUserId"], "u2");
        assert!(json.get("selector").is_none());
    }

    #[test]
    fn test_unit_requests_parse() {
        let req: Request = serde_json::from_str(r#"{"type":"clearHistory"}"#).unwrap();
        assert_eq!(req, Request::ClearHistory);

        let req: Request = serde_json::from_str(r#"{"type":"resetSubscriptions"}"#).unwrap();
        assert_eq!(req, Request::ResetSubscriptions);
    }

    #[test]
    fn test_history_query_defaults() {
        let req: Request =
            serde_json::from_str(r#"{"type":"getHistory","channels":["a","b"]}"#).unwrap();

        match req {
            Request::GetHistory(q) => {
                assert_eq!(q.channels, vec!["a", "b"]);
                assert_eq!(q.after_id, None);
                assert_eq!(q.take, None);
            }
            other => panic!("Expected GetHistory, got {:?}", other),
        }
    }
}
