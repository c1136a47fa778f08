//! Events pushed to live subscriptions.

use crate::message::ChatMessage;
use serde::{Deserialize, Serialize};

/// Body of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum Payload {
    /// A structured chat message.
    Chat(ChatMessage),
    /// A raw, already encoded notification.
    Raw {
        /// Channel the notification was posted to.
        channel: String,
        /// Encoded notification text.
        message: String,
    },
}

impl Payload {
    /// Create a raw payload.
    #[must_use]
    pub fn raw(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Payload::Raw {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// The channel this payload was posted to.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Payload::Chat(msg) => &msg.channel,
            Payload::Raw { channel, .. } => channel,
        }
    }
}

/// An event delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushEvent {
    /// Sent once when a subscription is registered.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Token to quote as `from` when posting.
        token: String,
        /// User the subscription is bound to.
        user_id: String,
        /// Display name of the user.
        display_name: String,
        /// Joined channels.
        channels: Vec<String>,
    },

    /// A routed notification.
    Notify {
        /// Client-side routing hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        /// The delivered payload.
        payload: Payload,
    },
}

impl PushEvent {
    /// Create a notification event.
    #[must_use]
    pub fn notify(selector: Option<&str>, payload: Payload) -> Self {
        PushEvent::Notify {
            selector: selector.map(str::to_string),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_json_shape() {
        let msg = ChatMessage::new(5, "home", "u1", "Alice", "hey");
        let event = PushEvent::notify(Some("cmd.chat"), Payload::Chat(msg));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "notify");
        assert_eq!(json["selector"], "cmd.chat");
        assert_eq!(json["payload"]["kind"], "chat");
        assert_eq!(json["payload"]["body"]["id"], 5);
    }

    #[test]
    fn test_connected_json_shape() {
        let event = PushEvent::Connected {
            token: "sub_1".into(),
            user_id: "u1".into(),
            display_name: "Alice".into(),
            channels: vec!["home".into()],
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "connected");
        assert_eq!(json["displayName"], "Alice");
    }

    #[test]
    fn test_payload_channel() {
        assert_eq!(Payload::raw("lobby", "x").channel(), "lobby");
        let msg = ChatMessage::new(1, "home", "u", "n", "m");
        assert_eq!(Payload::Chat(msg).channel(), "home");
    }
}
