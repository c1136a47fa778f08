//! The relay facade and request router.
//!
//! [`Relay`] wires the dispatcher, history and aggregator to one registry and
//! exposes the boundary operations. [`Relay::handle`] routes a tagged
//! [`Request`] to the matching operation.

use crate::aggregator::HistoryAggregator;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::history::ChatHistory;
use crate::registry::SubscriptionRegistry;
use relay_protocol::requests::{GetHistory, HistoryResponse, PostChat, PostRaw};
use relay_protocol::{ChatMessage, MessageId, Request, Response};
use std::sync::Arc;
use tracing::info;

/// Relay policy.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Reject raw notifications from unauthenticated callers.
    pub require_auth_for_remote_control: bool,
}

/// Per-request facts established by the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    /// Whether the caller is authenticated.
    pub is_authenticated: bool,
}

impl RequestContext {
    /// Context for an authenticated caller.
    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            is_authenticated: true,
        }
    }
}

/// The chat relay.
pub struct Relay {
    registry: Arc<dyn SubscriptionRegistry>,
    history: Arc<dyn ChatHistory>,
    dispatcher: Dispatcher,
    aggregator: HistoryAggregator,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay over a registry and a history store.
    #[must_use]
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        history: Arc<dyn ChatHistory>,
        config: RelayConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), Arc::clone(&history)),
            aggregator: HistoryAggregator::new(Arc::clone(&history)),
            registry,
            history,
            config,
        }
    }

    /// Get the relay policy.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Post a structured chat message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] if the sending subscription is gone.
    pub fn post_chat_message(&self, request: &PostChat) -> Result<ChatMessage, RelayError> {
        self.dispatcher.post_chat_message(request)
    }

    /// Post a raw notification under the relay's authentication policy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Forbidden`] or [`RelayError::NotFound`].
    pub fn post_raw_notification(
        &self,
        request: &PostRaw,
        ctx: &RequestContext,
    ) -> Result<(), RelayError> {
        self.dispatcher.post_raw_notification(
            request,
            ctx.is_authenticated,
            self.config.require_auth_for_remote_control,
        )
    }

    /// Recent history across channels, ascending by id.
    #[must_use]
    pub fn get_history<S: AsRef<str>>(
        &self,
        channels: &[S],
        after_id: Option<MessageId>,
        limit: Option<usize>,
    ) -> Vec<ChatMessage> {
        self.aggregator.query(channels, after_id, limit)
    }

    /// Flush all history.
    pub fn clear_history(&self) {
        self.history.flush();
        info!("History cleared");
    }

    /// Drop every live subscription.
    pub fn reset_subscriptions(&self) {
        self.registry.drop_all_subscriptions();
        info!("Subscriptions reset");
    }

    /// Route a request to its operation.
    ///
    /// # Errors
    ///
    /// Returns the error of the routed operation.
    pub fn handle(&self, request: Request, ctx: &RequestContext) -> Result<Response, RelayError> {
        match request {
            Request::PostChat(post) => self.post_chat_message(&post).map(Response::Chat),
            Request::PostRaw(post) => self
                .post_raw_notification(&post, ctx)
                .map(|()| Response::Empty),
            Request::GetHistory(GetHistory {
                channels,
                after_id,
                take,
            }) => Ok(Response::History(HistoryResponse {
                results: self.get_history(channels.as_slice(), after_id, take),
            })),
            Request::ClearHistory => {
                self.clear_history();
                Ok(Response::Empty)
            }
            Request::ResetSubscriptions => {
                self.reset_subscriptions();
                Ok(Response::Empty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryChatHistory;
    use crate::memory::MemoryRegistry;

    fn relay(require_auth: bool) -> (Relay, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        let relay = Relay::new(
            registry.clone(),
            Arc::new(MemoryChatHistory::new()),
            RelayConfig {
                require_auth_for_remote_control: require_auth,
            },
        );
        (relay, registry)
    }

    #[test]
    fn test_handle_routes_every_variant() {
        let (relay, registry) = relay(false);
        let (sub, _rx) = registry
            .subscribe("u1", "Alice", &["home".to_string()])
            .unwrap();
        let ctx = RequestContext::default();

        let posted = relay
            .handle(Request::PostChat(PostChat::new(&sub.token, "home", "hi")), &ctx)
            .unwrap();
        let msg = match posted {
            Response::Chat(msg) => msg,
            other => panic!("Expected Chat, got {:?}", other),
        };

        let raw = relay
            .handle(Request::PostRaw(PostRaw::new(&sub.token, "home", "x")), &ctx)
            .unwrap();
        assert_eq!(raw, Response::Empty);

        let history = relay
            .handle(
                Request::GetHistory(GetHistory {
                    channels: vec!["home".into()],
                    ..GetHistory::default()
                }),
                &ctx,
            )
            .unwrap();
        assert_eq!(
            history,
            Response::History(HistoryResponse {
                results: vec![msg]
            })
        );

        assert_eq!(relay.handle(Request::ClearHistory, &ctx).unwrap(), Response::Empty);
        assert!(relay.get_history(&["home"], None, None).is_empty());

        assert_eq!(
            relay.handle(Request::ResetSubscriptions, &ctx).unwrap(),
            Response::Empty
        );
        assert_eq!(registry.stats().subscription_count, 0);
    }

    #[test]
    fn test_remote_control_policy() {
        let (relay, registry) = relay(true);
        let (sub, _rx) = registry
            .subscribe("u1", "Alice", &["home".to_string()])
            .unwrap();
        let post = PostRaw::new(&sub.token, "home", "x");

        assert!(matches!(
            relay.post_raw_notification(&post, &RequestContext::default()),
            Err(RelayError::Forbidden(_))
        ));
        assert!(relay
            .post_raw_notification(&post, &RequestContext::authenticated())
            .is_ok());
    }

    #[test]
    fn test_resets_are_independent() {
        let (relay, registry) = relay(false);
        let (sub, _rx) = registry
            .subscribe("u1", "Alice", &["home".to_string()])
            .unwrap();
        relay
            .post_chat_message(&PostChat::new(&sub.token, "home", "kept"))
            .unwrap();

        relay.reset_subscriptions();
        assert_eq!(relay.get_history(&["home"], None, None).len(), 1);

        let (sub, _rx) = registry
            .subscribe("u1", "Alice", &["home".to_string()])
            .unwrap();
        relay.clear_history();
        assert!(registry.lookup_by_token(&sub.token).is_some());
    }
}
