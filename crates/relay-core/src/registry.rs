//! The subscription registry seam.
//!
//! The relay never owns live connections. It reaches them only through
//! [`SubscriptionRegistry`], which a host backs with whatever push transport
//! it runs. [`crate::memory::MemoryRegistry`] is the in-process implementation.

use relay_protocol::Payload;
use serde::{Deserialize, Serialize};

/// A live subscription as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Opaque subscription token.
    pub token: String,
    /// User the subscription is bound to.
    pub user_id: String,
    /// Display name of the user.
    pub display_name: String,
    /// Joined channels.
    pub channels: Vec<String>,
}

/// Live subscriptions, multicast delivery and sequence allocation.
///
/// Delivery to a subscription that has gone away is a no-op, never an error.
/// Every delivery method returns the number of subscriptions reached.
pub trait SubscriptionRegistry: Send + Sync {
    /// Resolve a subscription token.
    fn lookup_by_token(&self, token: &str) -> Option<SubscriptionInfo>;

    /// All live subscriptions of a user.
    fn active_subscriptions_for_user(&self, user_id: &str) -> Vec<SubscriptionInfo>;

    /// Deliver to every subscription joined to a channel.
    fn notify_channel(&self, channel: &str, selector: Option<&str>, payload: Payload) -> usize;

    /// Deliver to every subscription of a user.
    fn notify_user(&self, user_id: &str, selector: Option<&str>, payload: Payload) -> usize;

    /// Deliver to a single subscription.
    fn notify_subscription(&self, token: &str, selector: Option<&str>, payload: Payload)
        -> usize;

    /// Next value of a named counter. Unique per call, starting at 1.
    fn next_sequence(&self, name: &str) -> u64;

    /// Drop every subscription, forcing clients to resubscribe.
    fn drop_all_subscriptions(&self);
}
