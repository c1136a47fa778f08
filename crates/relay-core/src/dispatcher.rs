//! Message dispatch.
//!
//! The dispatcher turns a post into a routed delivery. Both request shapes
//! share the same skeleton: validate the sender, encode the text, then route
//! either to one user (direct) or to a whole channel (public). Only public
//! chat messages reach history.

use crate::error::RelayError;
use crate::history::ChatHistory;
use crate::registry::{SubscriptionInfo, SubscriptionRegistry};
use crate::sanitize::html_encode;
use relay_protocol::requests::{PostChat, PostRaw};
use relay_protocol::{ChatMessage, Payload};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the counter all chat message ids are drawn from, across channels.
pub const CHAT_SEQUENCE: &str = "chatMsg";

/// Routes posts through the registry and records public ones.
pub struct Dispatcher {
    registry: Arc<dyn SubscriptionRegistry>,
    history: Arc<dyn ChatHistory>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry and a history store.
    #[must_use]
    pub fn new(registry: Arc<dyn SubscriptionRegistry>, history: Arc<dyn ChatHistory>) -> Self {
        Self { registry, history }
    }

    /// Post a structured chat message.
    ///
    /// A direct message goes to every subscription of the target user and is
    /// echoed to every subscription of the sender, once per recipient
    /// subscription, as `@<recipient>: <text>`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] if the sending subscription is gone.
    pub fn post_chat_message(&self, request: &PostChat) -> Result<ChatMessage, RelayError> {
        let sender = self.validate_sender(&request.from)?;
        let selector = request.selector.as_deref();

        let text = html_encode(&request.message);
        let id = self.registry.next_sequence(CHAT_SEQUENCE);
        let mut message = ChatMessage::new(
            id,
            request.channel.as_str(),
            sender.user_id.as_str(),
            sender.display_name.as_str(),
            text,
        );

        match &request.to_user_id {
            Some(to_user_id) => {
                message = message.into_private();
                let delivered =
                    self.registry
                        .notify_user(to_user_id, selector, Payload::Chat(message.clone()));

                let sender_subs = self.registry.active_subscriptions_for_user(&sender.user_id);
                let recipients = self.registry.active_subscriptions_for_user(to_user_id);
                for recipient in &recipients {
                    let echo = message.addressed_to(&recipient.display_name);
                    for own in &sender_subs {
                        self.registry.notify_subscription(
                            &own.token,
                            selector,
                            Payload::Chat(echo.clone()),
                        );
                    }
                }

                debug!(
                    id,
                    channel = %request.channel,
                    to = %to_user_id,
                    recipients = delivered,
                    echoes = recipients.len() * sender_subs.len(),
                    "Routed direct message"
                );
            }
            None => {
                let delivered = self.registry.notify_channel(
                    &request.channel,
                    selector,
                    Payload::Chat(message.clone()),
                );
                debug!(id, channel = %request.channel, recipients = delivered, "Routed chat message");
            }
        }

        if !message.private {
            self.history.append(&request.channel, message.clone());
        }

        Ok(message)
    }

    /// Post a raw notification. Raw notifications are never recorded.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Forbidden`] if authentication is required and the
    /// caller is not authenticated, checked before anything else, or
    /// [`RelayError::NotFound`] if the sending subscription is gone.
    pub fn post_raw_notification(
        &self,
        request: &PostRaw,
        is_authenticated: bool,
        require_auth: bool,
    ) -> Result<(), RelayError> {
        if require_auth && !is_authenticated {
            warn!(from = %request.from, channel = %request.channel, "Unauthenticated remote control");
            return Err(RelayError::Forbidden(
                "You must be authenticated to use remote control.".to_string(),
            ));
        }

        self.validate_sender(&request.from)?;
        let selector = request.selector.as_deref();
        let payload = Payload::raw(request.channel.as_str(), html_encode(&request.message));

        let delivered = match &request.to_user_id {
            Some(to_user_id) => self.registry.notify_user(to_user_id, selector, payload),
            None => self
                .registry
                .notify_channel(&request.channel, selector, payload),
        };

        debug!(
            channel = %request.channel,
            to = ?request.to_user_id,
            recipients = delivered,
            "Routed raw notification"
        );

        Ok(())
    }

    fn validate_sender(&self, token: &str) -> Result<SubscriptionInfo, RelayError> {
        self.registry.lookup_by_token(token).ok_or_else(|| {
            warn!(token = %token, "Post from unknown subscription");
            RelayError::subscription_not_found(token)
        })
    }
}
