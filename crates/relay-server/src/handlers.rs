//! HTTP and WebSocket handlers for the Relay server.
//!
//! Posts, history queries and resets are plain HTTP calls into the relay.
//! Subscribers hold a WebSocket open and receive every event the registry
//! routes to them.

use crate::config::Config;
use crate::metrics::{self, SubscriptionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::memory::EventReceiver;
use relay_core::{
    MemoryChatHistory, MemoryRegistry, Relay, RegistryError, RelayError, RequestContext,
};
use relay_protocol::{
    codec, ChatMessage, GetHistory, HistoryResponse, PostChat, PostRaw, PushEvent, Request,
    Response as RelayResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The relay.
    pub relay: Relay,
    /// The registry backing the relay, for subscribing sockets.
    pub registry: Arc<MemoryRegistry>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(MemoryRegistry::with_config(config.registry_config()));
        let history = Arc::new(MemoryChatHistory::with_config(config.history_config()));
        let relay = Relay::new(registry.clone(), history, config.relay_config());

        Self {
            relay,
            registry,
            config,
        }
    }

    /// Route a request through the relay.
    fn handle(&self, request: Request, headers: &HeaderMap) -> Result<RelayResponse, ApiError> {
        let ctx = RequestContext {
            is_authenticated: self.is_authenticated(headers),
        };
        Ok(self.relay.handle(request, &ctx)?)
    }

    /// Whether the request carries the configured bearer key.
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        let Some(key) = self.config.remote_control.api_key.as_deref() else {
            return false;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == key)
    }
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Relay rejected the operation.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Subscription could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Message text over the configured limit.
    #[error("Message of {0} bytes exceeds limit of {1}")]
    MessageTooLarge(usize, usize),

    /// The relay answered with a response of the wrong shape.
    #[error("Unexpected relay response: {0:?}")]
    UnexpectedResponse(RelayResponse),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Relay(RelayError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Relay(RelayError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Registry(RegistryError::MaxSubscriptionsReached(_)) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Registry(_) => StatusCode::BAD_REQUEST,
            ApiError::MessageTooLarge(..) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnexpectedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Relay(e) => e.kind(),
            ApiError::Registry(_) => "subscribe",
            ApiError::MessageTooLarge(..) => "too_large",
            ApiError::UnexpectedResponse(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.kind());
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Body of a chat or raw post; the channel comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostBody {
    from: String,
    #[serde(default)]
    to_user_id: Option<String>,
    message: String,
    #[serde(default)]
    selector: Option<String>,
}

/// History query string: `channels` is comma separated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    #[serde(default)]
    channels: Option<String>,
    #[serde(default)]
    after_id: Option<u64>,
    #[serde(default)]
    take: Option<usize>,
}

/// Encoding used for events pushed over a socket.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary frames.
    Msgpack,
}

/// WebSocket subscription parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    user_id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    channels: Option<String>,
    #[serde(default)]
    format: PushFormat,
}

fn split_channels(channels: Option<&str>) -> Vec<String> {
    channels
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/channels/:channel/chat", post(post_chat_handler))
        .route("/channels/:channel/raw", post(post_raw_handler))
        .route("/chathistory", get(history_handler))
        .route("/reset", post(clear_history_handler))
        .route("/reset-serverevents", post(reset_subscriptions_handler))
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));
    let app = app(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

fn check_size(state: &AppState, message: &str) -> Result<(), ApiError> {
    let max = state.config.limits.max_message_size;
    if message.len() > max {
        return Err(ApiError::MessageTooLarge(message.len(), max));
    }
    Ok(())
}

async fn post_chat_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PostBody>,
) -> Result<Json<ChatMessage>, ApiError> {
    let start = Instant::now();
    check_size(&state, &body.message)?;

    let request = PostChat {
        from: body.from,
        channel,
        to_user_id: body.to_user_id,
        message: body.message,
        selector: body.selector,
    };
    let message = match state.handle(Request::PostChat(request), &headers)? {
        RelayResponse::Chat(message) => message,
        other => return Err(ApiError::UnexpectedResponse(other)),
    };

    metrics::record_post(if message.private { "private" } else { "chat" });
    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(Json(message))
}

async fn post_raw_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PostBody>,
) -> Result<StatusCode, ApiError> {
    let start = Instant::now();
    check_size(&state, &body.message)?;

    let request = PostRaw {
        from: body.from,
        channel,
        to_user_id: body.to_user_id,
        message: body.message,
        selector: body.selector,
    };
    state.handle(Request::PostRaw(request), &headers)?;

    metrics::record_post("raw");
    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(StatusCode::NO_CONTENT)
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let query = GetHistory {
        channels: split_channels(params.channels.as_deref()),
        after_id: params.after_id,
        take: params.take,
    };
    let history = match state.handle(Request::GetHistory(query), &headers)? {
        RelayResponse::History(history) => history,
        other => return Err(ApiError::UnexpectedResponse(other)),
    };

    metrics::record_history_query(history.results.len());
    Ok(Json(history))
}

async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.handle(Request::ClearHistory, &headers)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_subscriptions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.handle(Request::ResetSubscriptions, &headers)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscriptions": stats.subscription_count,
        "channels": stats.channel_count,
    }))
}

/// A registered subscription, removed from the registry when dropped.
///
/// Owned by the upgrade callback, so a subscription whose upgrade never
/// completes is released as well.
struct SubscriptionHandle {
    registry: Arc<MemoryRegistry>,
    token: String,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.registry.unsubscribe(&self.token).is_some() {
            debug!(token = %self.token, "Released subscription");
        }
    }
}

/// WebSocket upgrade handler.
///
/// The subscription is registered before the upgrade so invalid parameters
/// are rejected with a plain HTTP error.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    let display_name = params.display_name.unwrap_or_else(|| params.user_id.clone());
    let channels = split_channels(params.channels.as_deref());
    let (info, events) = state
        .registry
        .subscribe(&params.user_id, &display_name, &channels)?;

    let handle = SubscriptionHandle {
        registry: Arc::clone(&state.registry),
        token: info.token,
    };
    let format = params.format;
    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, handle, events, format)))
}

fn encode_event(event: &PushEvent, format: PushFormat) -> Result<Message, codec::ProtocolError> {
    match format {
        PushFormat::Json => codec::encode_json(event).map(Message::Text),
        PushFormat::Msgpack => codec::encode(event).map(|data| Message::Binary(data.to_vec())),
    }
}

fn frame_len(message: &Message) -> usize {
    match message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    }
}

/// Handle a subscribed WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    subscription: SubscriptionHandle,
    mut events: EventReceiver,
    format: PushFormat,
) {
    let _metrics_guard = SubscriptionMetricsGuard::new();
    let token = subscription.token.clone();
    debug!(token = %token, "WebSocket subscribed");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Registry dropped the subscription
                    debug!(token = %token, "Subscription reset");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };

                if let PushEvent::Notify { payload, .. } = event.as_ref() {
                    trace!(token = %token, channel = %payload.channel(), "Pushing notification");
                }
                let frame = match encode_event(&event, format) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(token = %token, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                metrics::record_push(frame_len(&frame));
                if sender.send(frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(token = %token, "Received close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Posts go through HTTP; other inbound frames are ignored
                    }
                    Some(Err(e)) => {
                        warn!(token = %token, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(token = %token, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    drop(subscription);
    debug!(token = %token, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use relay_core::{Payload, SubscriptionRegistry};
    use tower::ServiceExt;

    fn state(require_auth: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.remote_control.require_auth = require_auth;
        config.remote_control.api_key = Some("k3y".to_string());
        config.limits.max_message_size = 64;
        Arc::new(AppState::new(config))
    }

    fn subscribe(state: &AppState, user: &str, name: &str) -> (String, EventReceiver) {
        let (info, rx) = state
            .registry
            .subscribe(user, name, &["home".to_string()])
            .unwrap();
        (info.token, rx)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_chat_then_history() {
        let state = state(false);
        let (token, _rx) = subscribe(&state, "u1", "Alice");

        for text in ["one", "<two>"] {
            let response = app(state.clone())
                .oneshot(post_json(
                    "/channels/home/chat",
                    serde_json::json!({ "from": token, "message": text }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/chathistory?channels=home,elsewhere&afterId=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], 2);
        assert_eq!(results[0]["message"], "&lt;two&gt;");
        assert_eq!(results[0]["fromName"], "Alice");
    }

    #[tokio::test]
    async fn test_unknown_sender_is_404() {
        let state = state(false);
        let response = app(state)
            .oneshot(post_json(
                "/channels/home/chat",
                serde_json::json!({ "from": "sub_missing", "message": "hi" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Subscription sub_missing does not exist");
    }

    #[tokio::test]
    async fn test_raw_post_requires_bearer_key() {
        let state = state(true);
        let (token, mut rx) = subscribe(&state, "u1", "Alice");
        let _ = rx.try_recv(); // Connected

        let body = serde_json::json!({ "from": token, "message": "reload", "selector": "cmd.reload" });

        let response = app(state.clone())
            .oneshot(post_json("/channels/home/raw", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(rx.try_recv().is_err());

        let mut request = post_json("/channels/home/raw", body);
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer k3y".parse().unwrap());
        let response = app(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        match rx.try_recv().unwrap().as_ref() {
            PushEvent::Notify { selector, payload } => {
                assert_eq!(selector.as_deref(), Some("cmd.reload"));
                assert_eq!(payload, &Payload::raw("home", "reload"));
            }
            other => panic!("Expected Notify, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_size_limit() {
        let state = state(false);
        let (token, _rx) = subscribe(&state, "u1", "Alice");

        let response = app(state)
            .oneshot(post_json(
                "/channels/home/chat",
                serde_json::json!({ "from": token, "message": "x".repeat(65) }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_resets() {
        let state = state(false);
        let (token, _rx) = subscribe(&state, "u1", "Alice");
        state
            .relay
            .post_chat_message(&PostChat::new(&token, "home", "hi"))
            .unwrap();

        let response = app(state.clone())
            .oneshot(post_json("/reset", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.relay.get_history(&["home"], None, None).is_empty());
        assert!(state.registry.lookup_by_token(&token).is_some());

        let response = app(state.clone())
            .oneshot(post_json("/reset-serverevents", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.registry.stats().subscription_count, 0);
    }

    #[test]
    fn test_subscription_released_when_upgrade_never_runs() {
        let state = state(false);
        let (token, _rx) = subscribe(&state, "u1", "Alice");
        let handle = SubscriptionHandle {
            registry: Arc::clone(&state.registry),
            token: token.clone(),
        };

        // Upgrade callback dropped without being called
        let on_upgrade = move || drop(handle);
        drop(on_upgrade);

        assert!(state.registry.lookup_by_token(&token).is_none());
        assert!(state.registry.active_subscriptions_for_user("u1").is_empty());
    }

    #[test]
    fn test_unexpected_relay_response_is_500() {
        let response = ApiError::UnexpectedResponse(RelayResponse::Empty).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_relay_policy_follows_config() {
        assert!(state(true).relay.config().require_auth_for_remote_control);
        assert!(!state(false).relay.config().require_auth_for_remote_control);
    }

    #[test]
    fn test_split_channels() {
        assert_eq!(split_channels(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(split_channels(None).is_empty());
    }
}
