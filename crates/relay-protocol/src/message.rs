//! The chat message record.

use serde::{Deserialize, Serialize};

/// A process-wide unique message identifier.
pub type MessageId = u64;

/// A chat message as delivered to subscribers and kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Globally increasing message id.
    pub id: MessageId,
    /// Channel the message was posted to.
    pub channel: String,
    /// User id of the sending subscription.
    pub from_user_id: String,
    /// Display name of the sending subscription.
    pub from_name: String,
    /// HTML-encoded message text.
    pub message: String,
    /// Set for direct messages, which are never kept in history.
    #[serde(default)]
    pub private: bool,
}

impl ChatMessage {
    /// Create a public message.
    #[must_use]
    pub fn new(
        id: MessageId,
        channel: impl Into<String>,
        from_user_id: impl Into<String>,
        from_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel: channel.into(),
            from_user_id: from_user_id.into(),
            from_name: from_name.into(),
            message: message.into(),
            private: false,
        }
    }

    /// Mark the message as a direct message.
    #[must_use]
    pub fn into_private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Copy of this message with its text addressed to a recipient, as echoed
    /// back to the sender of a direct message.
    #[must_use]
    pub fn addressed_to(&self, recipient_name: &str) -> Self {
        Self {
            message: format!("@{}: {}", recipient_name, self.message),
            ..self.clone()
        }
    }
}
