//! In-memory subscription registry.
//!
//! Subscriptions are indexed by token, channel and user using lock-free maps.
//! Each subscription owns an unbounded queue; the host drains the receiver
//! half and pushes events over its transport.

use crate::channel::{validate_channel_name, ChannelId};
use crate::registry::{SubscriptionInfo, SubscriptionRegistry};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use relay_protocol::{Payload, PushEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Too many channels requested for one subscription.
    #[error("Too many channels: {0} (max {1})")]
    TooManyChannels(usize, usize),

    /// The user already holds the maximum number of subscriptions.
    #[error("Maximum subscriptions reached for user {0}")]
    MaxSubscriptionsReached(String),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum simultaneous subscriptions per user.
    pub max_subscriptions_per_user: usize,
    /// Maximum channels joined by one subscription.
    pub max_channels_per_subscription: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_user: 32,
            max_channels_per_subscription: 100,
        }
    }
}

/// Receiving half of a subscription's event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<PushEvent>>;

struct SubscriptionEntry {
    info: SubscriptionInfo,
    sender: mpsc::UnboundedSender<Arc<PushEvent>>,
}

/// The in-memory registry.
pub struct MemoryRegistry {
    /// Subscriptions indexed by token.
    subscriptions: DashMap<String, SubscriptionEntry>,
    /// Channel members (channel -> tokens).
    channels: DashMap<ChannelId, DashSet<String>>,
    /// User subscriptions (user id -> tokens).
    users: DashMap<String, DashSet<String>>,
    /// Named counters.
    sequences: DashMap<String, AtomicU64>,
    /// Token counter.
    next_token: AtomicU64,
    /// Held shared by subscribe/unsubscribe, exclusive by a full reset.
    gate: RwLock<()>,
    /// Configuration.
    config: RegistryConfig,
}

impl MemoryRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating subscription registry with config: {:?}", config);
        Self {
            subscriptions: DashMap::new(),
            channels: DashMap::new(),
            users: DashMap::new(),
            sequences: DashMap::new(),
            next_token: AtomicU64::new(1),
            gate: RwLock::new(()),
            config,
        }
    }

    /// Register a subscription for a user on a set of channels.
    ///
    /// The returned receiver yields a `Connected` event first.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel name is invalid or limits are exceeded.
    pub fn subscribe(
        &self,
        user_id: &str,
        display_name: &str,
        channels: &[String],
    ) -> Result<(SubscriptionInfo, EventReceiver), RegistryError> {
        let mut seen = HashSet::new();
        let channels: Vec<String> = channels
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        for channel in &channels {
            validate_channel_name(channel).map_err(RegistryError::InvalidChannel)?;
        }

        if channels.len() > self.config.max_channels_per_subscription {
            return Err(RegistryError::TooManyChannels(
                channels.len(),
                self.config.max_channels_per_subscription,
            ));
        }

        let _gate = self.gate.read();

        // Check and claim the user's slot under one shard lock so concurrent
        // subscribes cannot both pass the limit.
        let token = {
            let held = self.users.entry(user_id.to_string()).or_default();
            if held.len() >= self.config.max_subscriptions_per_user {
                drop(held);
                self.users.remove_if(user_id, |_, set| set.is_empty());
                return Err(RegistryError::MaxSubscriptionsReached(user_id.to_string()));
            }
            let token = format!("sub_{}", self.next_token.fetch_add(1, Ordering::Relaxed));
            held.insert(token.clone());
            token
        };

        let info = SubscriptionInfo {
            token: token.clone(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            channels,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let connected = PushEvent::Connected {
            token: token.clone(),
            user_id: info.user_id.clone(),
            display_name: info.display_name.clone(),
            channels: info.channels.clone(),
        };
        // The receiver is still held here, so this cannot fail.
        let _ = sender.send(Arc::new(connected));

        for channel in &info.channels {
            self.channels
                .entry(channel.clone())
                .or_default()
                .insert(token.clone());
        }
        self.subscriptions.insert(
            token.clone(),
            SubscriptionEntry {
                info: info.clone(),
                sender,
            },
        );

        debug!(
            token = %token,
            user = %info.user_id,
            channels = ?info.channels,
            "Subscribed"
        );

        Ok((info, receiver))
    }

    /// Remove a subscription from every index.
    ///
    /// Returns the removed subscription, if it was live.
    pub fn unsubscribe(&self, token: &str) -> Option<SubscriptionInfo> {
        let _gate = self.gate.read();
        let (_, entry) = self.subscriptions.remove(token)?;

        for channel in &entry.info.channels {
            remove_member(&self.channels, channel, token);
        }
        remove_member(&self.users, &entry.info.user_id, token);

        debug!(token = %token, user = %entry.info.user_id, "Unsubscribed");
        Some(entry.info)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscription_count: self.subscriptions.len(),
            channel_count: self.channels.len(),
            user_count: self.users.len(),
        }
    }

    fn deliver<'a>(
        &self,
        tokens: impl IntoIterator<Item = &'a String>,
        event: PushEvent,
    ) -> usize {
        let event = Arc::new(event);
        tokens
            .into_iter()
            .filter(|token| {
                self.subscriptions
                    .get(token.as_str())
                    .map(|entry| entry.sender.send(Arc::clone(&event)).is_ok())
                    .unwrap_or(false)
            })
            .count()
    }
}

fn remove_member(index: &DashMap<String, DashSet<String>>, key: &str, token: &str) {
    if let Some(set) = index.get(key) {
        set.remove(token);
    }
    index.remove_if(key, |_, set| set.is_empty());
}

fn members(index: &DashMap<String, DashSet<String>>, key: &str) -> Vec<String> {
    index
        .get(key)
        .map(|s| s.iter().map(|t| t.key().clone()).collect())
        .unwrap_or_default()
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry for MemoryRegistry {
    fn lookup_by_token(&self, token: &str) -> Option<SubscriptionInfo> {
        self.subscriptions.get(token).map(|e| e.info.clone())
    }

    fn active_subscriptions_for_user(&self, user_id: &str) -> Vec<SubscriptionInfo> {
        members(&self.users, user_id)
            .iter()
            .filter_map(|token| self.lookup_by_token(token))
            .collect()
    }

    fn notify_channel(&self, channel: &str, selector: Option<&str>, payload: Payload) -> usize {
        let tokens = members(&self.channels, channel);
        let count = self.deliver(&tokens, PushEvent::notify(selector, payload));
        trace!(channel = %channel, recipients = count, "Notified channel");
        count
    }

    fn notify_user(&self, user_id: &str, selector: Option<&str>, payload: Payload) -> usize {
        let tokens = members(&self.users, user_id);
        let count = self.deliver(&tokens, PushEvent::notify(selector, payload));
        trace!(user = %user_id, recipients = count, "Notified user");
        count
    }

    fn notify_subscription(
        &self,
        token: &str,
        selector: Option<&str>,
        payload: Payload,
    ) -> usize {
        let token = token.to_string();
        self.deliver([&token], PushEvent::notify(selector, payload))
    }

    fn next_sequence(&self, name: &str) -> u64 {
        if let Some(counter) = self.sequences.get(name) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.sequences
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    fn drop_all_subscriptions(&self) {
        let _gate = self.gate.write();
        let dropped = self.subscriptions.len();
        self.subscriptions.clear();
        self.channels.clear();
        self.users.clear();
        info!(dropped, "Dropped all subscriptions");
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live subscriptions.
    pub subscription_count: usize,
    /// Number of channels with at least one member.
    pub channel_count: usize,
    /// Number of users with at least one subscription.
    pub user_count: usize,
}
