//! Multi-channel history queries.

use crate::history::ChatHistory;
use relay_protocol::{ChatMessage, MessageId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Merges per-channel history into one id-ordered result.
pub struct HistoryAggregator {
    history: Arc<dyn ChatHistory>,
}

impl HistoryAggregator {
    /// Create an aggregator over a history store.
    #[must_use]
    pub fn new(history: Arc<dyn ChatHistory>) -> Self {
        Self { history }
    }

    /// Query each channel with the same watermark and limit, then merge
    /// ascending by id.
    ///
    /// The limit applies per channel, so `k` channels can yield up to
    /// `k * limit` messages. Repeated channel names are queried once.
    #[must_use]
    pub fn query<S: AsRef<str>>(
        &self,
        channels: &[S],
        after_id: Option<MessageId>,
        limit: Option<usize>,
    ) -> Vec<ChatMessage> {
        let channels: BTreeSet<&str> = channels.iter().map(AsRef::as_ref).collect();

        let mut merged: Vec<ChatMessage> = channels
            .iter()
            .flat_map(|channel| self.history.recent(channel, after_id, limit))
            .collect();
        merged.sort_by_key(|m| m.id);

        trace!(channels = channels.len(), results = merged.len(), "History query");
        merged
    }
}
