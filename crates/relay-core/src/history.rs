//! Per-channel message history.
//!
//! History keeps the public messages of each channel in ascending id order
//! and answers "last N messages newer than a watermark" queries, which is
//! what a reconnecting client needs to replay what it missed.

use crate::channel::ChannelId;
use dashmap::DashMap;
use relay_protocol::{ChatMessage, MessageId};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Default number of messages returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// History configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Limit applied when a query does not specify one.
    pub default_limit: usize,
    /// Oldest messages beyond this count are evicted on append.
    pub max_messages_per_channel: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_HISTORY_LIMIT,
            max_messages_per_channel: None,
        }
    }
}

/// A store of public channel history.
pub trait ChatHistory: Send + Sync {
    /// Record a delivered public message.
    fn append(&self, channel: &str, message: ChatMessage);

    /// The most recent `limit` messages with an id greater than `after_id`,
    /// ascending by id. Unknown channels yield nothing.
    fn recent(
        &self,
        channel: &str,
        after_id: Option<MessageId>,
        limit: Option<usize>,
    ) -> Vec<ChatMessage>;

    /// Clear every channel.
    fn flush(&self);
}

/// In-memory history, one ordered log per channel.
pub struct MemoryChatHistory {
    channels: DashMap<ChannelId, VecDeque<ChatMessage>>,
    config: HistoryConfig,
}

impl MemoryChatHistory {
    /// Create a history store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    /// Create a history store with custom configuration.
    #[must_use]
    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    /// Number of channels with recorded history.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of messages recorded for a channel.
    #[must_use]
    pub fn len(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|log| log.len()).unwrap_or(0)
    }

    /// Check if no channel holds any history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|log| log.is_empty())
    }
}

impl Default for MemoryChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHistory for MemoryChatHistory {
    fn append(&self, channel: &str, message: ChatMessage) {
        let mut log = self.channels.entry(channel.to_string()).or_default();

        let out_of_order = log.back().is_some_and(|last| last.id >= message.id);
        if out_of_order {
            // A post that allocated its id earlier finished routing later.
            let pos = log.partition_point(|m| m.id < message.id);
            if log.get(pos).is_some_and(|m| m.id == message.id) {
                warn!(channel = %channel, id = message.id, "Duplicate message id ignored");
                return;
            }
            trace!(channel = %channel, id = message.id, pos, "Out-of-order append");
            log.insert(pos, message);
        } else {
            log.push_back(message);
        }

        if let Some(max) = self.config.max_messages_per_channel {
            if log.len() > max {
                let excess = log.len() - max;
                log.drain(..excess);
                trace!(channel = %channel, evicted = excess, "Evicted old history");
            }
        }
    }

    fn recent(
        &self,
        channel: &str,
        after_id: Option<MessageId>,
        limit: Option<usize>,
    ) -> Vec<ChatMessage> {
        let Some(log) = self.channels.get(channel) else {
            return Vec::new();
        };

        let after_id = after_id.unwrap_or(0);
        let limit = limit.unwrap_or(self.config.default_limit);

        let newer = log.partition_point(|m| m.id <= after_id);
        let start = newer.max(log.len().saturating_sub(limit));

        log.range(start..).cloned().collect()
    }

    fn flush(&self) {
        let channels = self.channels.len();
        self.channels.clear();
        debug!(channels, "Flushed history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: MessageId, channel: &str) -> ChatMessage {
        ChatMessage::new(id, channel, "u1", "Alice", format!("m{}", id))
    }

    fn ids(messages: &[ChatMessage]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    fn seeded(channel: &str, range: std::ops::RangeInclusive<MessageId>) -> MemoryChatHistory {
        let history = MemoryChatHistory::new();
        for id in range {
            history.append(channel, msg(id, channel));
        }
        history
    }

    #[test]
    fn test_recent_returns_post_order() {
        let history = seeded("home", 1..=5);
        assert_eq!(ids(&history.recent("home", None, None)), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_recent_takes_latest_not_first() {
        let history = seeded("home", 1..=10);
        assert_eq!(ids(&history.recent("home", Some(0), Some(3))), vec![8, 9, 10]);
    }

    #[test]
    fn test_recent_respects_watermark() {
        let history = seeded("home", 1..=10);

        assert_eq!(ids(&history.recent("home", Some(7), Some(100))), vec![8, 9, 10]);
        assert_eq!(ids(&history.recent("home", Some(5), Some(2))), vec![9, 10]);
        assert!(history.recent("home", Some(10), None).is_empty());
        assert!(history.recent("home", Some(3), Some(0)).is_empty());
    }

    #[test]
    fn test_recent_default_limit() {
        let history = seeded("home", 1..=150);
        let recent = history.recent("home", None, None);

        assert_eq!(recent.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(recent.first().map(|m| m.id), Some(51));
        assert_eq!(recent.last().map(|m| m.id), Some(150));
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let history = seeded("home", 1..=3);
        assert!(history.recent("nowhere", None, None).is_empty());
    }

    #[test]
    fn test_channels_are_independent() {
        let history = MemoryChatHistory::new();
        history.append("a", msg(1, "a"));
        history.append("b", msg(2, "b"));
        history.append("a", msg(3, "a"));

        assert_eq!(ids(&history.recent("a", None, None)), vec![1, 3]);
        assert_eq!(ids(&history.recent("b", None, None)), vec![2]);
        assert_eq!(history.channel_count(), 2);
    }

    #[test]
    fn test_out_of_order_append_keeps_ids_increasing() {
        let history = MemoryChatHistory::new();
        history.append("home", msg(1, "home"));
        history.append("home", msg(3, "home"));
        history.append("home", msg(2, "home"));
        history.append("home", msg(3, "home"));

        assert_eq!(ids(&history.recent("home", None, None)), vec![1, 2, 3]);
    }

    #[test]
    fn test_max_messages_per_channel_evicts_oldest() {
        let history = MemoryChatHistory::with_config(HistoryConfig {
            default_limit: 100,
            max_messages_per_channel: Some(3),
        });
        for id in 1..=5 {
            history.append("home", msg(id, "home"));
        }

        assert_eq!(history.len("home"), 3);
        assert_eq!(ids(&history.recent("home", None, None)), vec![3, 4, 5]);
    }

    #[test]
    fn test_flush_clears_everything() {
        let history = seeded("home", 1..=3);
        history.append("ops", msg(4, "ops"));

        history.flush();

        assert!(history.recent("home", None, None).is_empty());
        assert!(history.recent("ops", None, None).is_empty());
        assert!(history.is_empty());

        // Flushing again is harmless
        history.flush();
        assert_eq!(history.channel_count(), 0);
    }
}
